//! Connectivity and visibility of the host.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Edge-triggered focus/reconnect events plus point-in-time reads of the
/// online and hidden flags.
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;

    fn is_hidden(&self) -> bool;

    /// A stream yielding once every time the host gains focus.
    ///
    /// Events sent after this call returns are delivered even if the stream
    /// is polled later.
    fn focus_events(&self) -> BoxStream<'static, ()>;

    /// A stream yielding once every time the host comes back online.
    fn reconnect_events(&self) -> BoxStream<'static, ()>;
}

const EVENT_CAPACITY: usize = 16;

/// Signal driven by the host through method calls.
///
/// Starts online and visible. Left alone it never emits, which is what a
/// headless process wants.
pub struct ManualSignal {
    online: AtomicBool,
    hidden: AtomicBool,
    focus: broadcast::Sender<()>,
    reconnect: broadcast::Sender<()>,
}

impl ManualSignal {
    pub fn new() -> Self {
        ManualSignal {
            online: AtomicBool::new(true),
            hidden: AtomicBool::new(false),
            focus: broadcast::channel(EVENT_CAPACITY).0,
            reconnect: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    /// The host gained focus.
    pub fn focus(&self) {
        // No receivers just means nobody is bound.
        let _ = self.focus.send(());
    }

    /// Update the online flag. Going from offline to online emits a
    /// reconnect event.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            let _ = self.reconnect.send(());
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.hidden.store(!visible, Ordering::SeqCst);
    }
}

impl Default for ManualSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivitySignal for ManualSignal {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    fn focus_events(&self) -> BoxStream<'static, ()> {
        // A lagged receiver still saw at least one event.
        BroadcastStream::new(self.focus.subscribe()).map(|_| ()).boxed()
    }

    fn reconnect_events(&self) -> BoxStream<'static, ()> {
        BroadcastStream::new(self.reconnect.subscribe())
            .map(|_| ())
            .boxed()
    }
}
