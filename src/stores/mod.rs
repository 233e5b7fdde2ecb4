//! Cache provider implementations.

pub mod memory;
pub mod moka;

pub use memory::MapProvider;
pub use moka::{MokaProvider, MokaProviderConfig};
