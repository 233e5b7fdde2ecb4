//! Example demonstrating scopes sharing and isolating cache providers.
//!
//! Call sites bound to the same key in scopes sharing a provider see one
//! entry and one fetch. A nested scope with its own provider gets a
//! separate cache, while still inheriting the rest of its parent's options.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use swr_engine::{
    BoxError, KeyArgs, ManualSignal, MokaProvider, MokaProviderConfig, MutateOptions, Mutation,
    SharedProvider, SwrOptions, SwrScope,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
}

async fn load_user(args: KeyArgs) -> Result<User, BoxError> {
    let id = args.get(1).and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
    println!("Loading user from backend: {}", id);
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(User {
        id,
        name: "Andreas".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let signal = Arc::new(ManualSignal::new());
    let provider = SharedProvider::new(MokaProvider::new(MokaProviderConfig::default()));

    let root = SwrScope::builder()
        .shared_provider(provider.clone())
        .signal(signal.clone())
        .options(SwrOptions::from_env()?)
        .build();

    // A child scope changing options only: same provider, same entries
    let quiet = root.configure(SwrOptions::new().revalidate_on_focus(false));

    let header = root.bind(["/api/user", "chronark"], load_user, SwrOptions::new());
    let sidebar = quiet.bind(["/api/user", "chronark"], load_user, SwrOptions::new());

    let mut loaded = header.watch_validating();
    loaded.wait_for(|validating| !*validating).await?;
    println!("Header:  {:?}", header.data());
    println!("Sidebar: {:?}", sidebar.data()); // Same entry, loaded once

    // A nested scope with its own provider does not see the parent's cache
    let isolated = root.configure(SwrOptions::new().cache_provider(SharedProvider::default()));
    let preview = isolated.bind(["/api/user", "chronark"], load_user, SwrOptions::new());
    println!("Preview before fetch: {:?}", preview.data()); // None

    // Writes fan out to every call site of the key in the provider
    header
        .mutate(
            Some(Mutation::value(User {
                id: "chronark".to_string(),
                name: "Renamed".to_string(),
            })),
            MutateOptions::new().revalidate(false),
        )
        .await?;
    println!("Sidebar after mutate: {:?}", sidebar.data());

    // Focus revalidates the root call site only, once the throttle passed
    tokio::time::sleep(Duration::from_secs(6)).await;
    signal.focus();
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("Header after focus: {:?}", header.data());

    println!("\nCached keys: {:?}", provider.keys());

    Ok(())
}
