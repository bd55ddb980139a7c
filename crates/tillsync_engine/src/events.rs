//! Per-instance event channels.
//!
//! Each replication instance exposes a small set of observable streams
//! (active, errors, remote ids, resync). An [`EventChannel`] closes
//! exactly once, and sends after close are silent no-ops, so a canceled
//! instance can be observed safely from late subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// A single-value broadcast channel with idempotent close semantics.
///
/// Subscribers see the latest value and every subsequent change until
/// the channel is closed.
#[derive(Debug)]
pub struct EventChannel<T> {
    tx: watch::Sender<T>,
    closed: AtomicBool,
}

impl<T: Clone> EventChannel<T> {
    /// Creates a channel seeded with an initial value.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Publishes a value. No-op once the channel is closed.
    pub fn send(&self, value: T) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // send_replace never fails even with zero receivers.
        self.tx.send_replace(value);
    }

    /// Returns the latest published value.
    pub fn latest(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Subscribes to future changes. A subscriber obtained after close
    /// only ever observes the final value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Closes the channel. Idempotent: the first call wins, repeated
    /// calls are no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
