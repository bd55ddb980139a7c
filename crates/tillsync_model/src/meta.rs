//! The replication side-record: cached remote-ID snapshot plus audit time.

use crate::timestamp;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of the ids known to exist on the server for
/// one endpoint, persisted per replication identifier hash.
///
/// Fetched on demand, refreshed lazily once older than the configured
/// TTL (10 minutes by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMeta {
    /// All server ids for the endpoint at audit time.
    #[serde(rename = "remoteIDs")]
    pub remote_ids: Vec<u64>,
    /// When the snapshot was taken, ISO-8601.
    #[serde(rename = "lastAudit")]
    pub last_audit: String,
}

impl ReplicationMeta {
    /// Creates a snapshot stamped with the current time.
    pub fn now(remote_ids: Vec<u64>) -> Self {
        Self {
            remote_ids,
            last_audit: timestamp::now_gmt(),
        }
    }

    /// Returns true if the snapshot is older than `ttl` or its stamp is
    /// unreadable. Stale snapshots are refetched before the next audit.
    pub fn is_stale(&self, ttl: std::time::Duration) -> bool {
        let Some(taken) = timestamp::parse_gmt(&self.last_audit) else {
            return true;
        };
        let Ok(ttl) = Duration::from_std(ttl) else {
            return true;
        };
        chrono::Utc::now() - taken > ttl
    }
}
