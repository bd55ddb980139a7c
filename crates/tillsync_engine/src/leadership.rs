//! Leadership providers.
//!
//! When several processes (or browser tabs) share one local store, only
//! the elected leader issues outbound sync traffic. Leadership is
//! advisory: a non-leader may still read sync status and serve cached
//! data. Single-process targets use [`AlwaysLeader`]; multi-instance
//! hosts inject their own election implementation.

use async_trait::async_trait;
use tokio::sync::watch;

/// Inter-process coordination seam for outbound replication.
#[async_trait]
pub trait LeadershipProvider: Send + Sync {
    /// Resolves once this process holds leadership.
    async fn wait_for_leadership(&self);

    /// Returns true if this process currently holds leadership.
    fn is_leader(&self) -> bool;
}

/// Trivial provider for single-process targets: always the leader.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLeader;

#[async_trait]
impl LeadershipProvider for AlwaysLeader {
    async fn wait_for_leadership(&self) {}

    fn is_leader(&self) -> bool {
        true
    }
}

/// A provider whose leadership is granted externally.
///
/// Used by multi-instance hosts that run their own election, and by
/// tests that need to observe deferred auto-start.
#[derive(Debug)]
pub struct ManualLeadership {
    tx: watch::Sender<bool>,
}

impl ManualLeadership {
    /// Creates a provider that does not hold leadership yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Grants leadership; pending waiters resolve.
    pub fn grant(&self) {
        self.tx.send_replace(true);
    }

    /// Revokes leadership. In-flight cycles are not interrupted.
    pub fn revoke(&self) {
        self.tx.send_replace(false);
    }
}

impl Default for ManualLeadership {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadershipProvider for ManualLeadership {
    async fn wait_for_leadership(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_leader(&self) -> bool {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn always_leader_resolves_immediately() {
        let provider = AlwaysLeader;
        provider.wait_for_leadership().await;
        assert!(provider.is_leader());
    }

    #[tokio::test]
    async fn manual_leadership_defers_until_granted() {
        let provider = Arc::new(ManualLeadership::new());
        assert!(!provider.is_leader());

        let waiter = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.wait_for_leadership().await })
        };
        provider.grant();
        waiter.await.unwrap();
        assert!(provider.is_leader());
    }
}
