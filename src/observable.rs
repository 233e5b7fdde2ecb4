use std::fmt;

use tokio::sync::watch;

/// A value that can be read, replaced and watched for changes.
///
/// Backed by a `tokio::sync::watch` channel: the sender keeps the current
/// value even when nobody is subscribed, and every `set` wakes all receivers.
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T> Observable<T> {
    /// Create a new observable holding `value`.
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Observable { tx }
    }

    /// Return a clone of the current value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.tx.borrow().clone()
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Replace the value and notify every subscriber.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Subscribe to changes.
    ///
    /// The receiver starts with the current value marked as seen, so
    /// `changed().await` resolves on the next `set`.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Observable::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observable").field(&*self.tx.borrow()).finish()
    }
}
