//! Per-document sync status: the reconciliation ledger entry.

use serde::{Deserialize, Serialize};

/// Reconciliation state of one document relative to the remote source
/// of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Local and remote copies agree.
    #[serde(rename = "SYNCED")]
    Synced,
    /// Exists on the server, not yet present locally.
    #[serde(rename = "PULL_NEW")]
    PullNew,
    /// The server copy is newer than the local copy.
    #[serde(rename = "PULL_UPDATE")]
    PullUpdate,
    /// The local copy is newer than the server copy.
    #[serde(rename = "PUSH_UPDATE")]
    PushUpdate,
    /// No longer exists on the server; the local copy is stale.
    #[serde(rename = "PULL_DELETE")]
    PullDelete,
}

impl SyncStatus {
    /// Returns true for statuses that require fetching from the server.
    pub fn needs_pull(&self) -> bool {
        matches!(self, SyncStatus::PullNew | SyncStatus::PullUpdate)
    }
}

/// One row of the sync-status ledger, unique per `(id, endpoint)`.
///
/// Created and overwritten exclusively by the sync state manager during
/// audits; consumed by replication to decide what to fetch next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    /// Server-assigned document id.
    pub id: u64,
    /// Logical remote resource name, e.g. `products`.
    pub endpoint: String,
    /// Current reconciliation state.
    pub status: SyncStatus,
}

impl SyncStatusRecord {
    /// Creates a ledger row.
    pub fn new(id: u64, endpoint: impl Into<String>, status: SyncStatus) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            status,
        }
    }
}

/// The server-side view of one document used during audits: its id and
/// last modification time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Server-assigned document id.
    pub id: u64,
    /// Server-reported modification time.
    #[serde(default)]
    pub date_modified_gmt: Option<String>,
}

impl AuditEntry {
    /// Creates an audit entry.
    pub fn new(id: u64, date_modified_gmt: Option<&str>) -> Self {
        Self {
            id,
            date_modified_gmt: date_modified_gmt.map(str::to_string),
        }
    }
}
