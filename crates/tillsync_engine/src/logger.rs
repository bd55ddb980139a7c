//! The audit-log collaborator.
//!
//! The host application keeps a user-visible audit trail of what sync
//! changed. The engine reports through this seam and never lets a
//! logging failure affect a cycle; every method is infallible from the
//! caller's point of view.

use async_trait::async_trait;
use parking_lot::Mutex;

/// Which fetch strategy produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Full remote id listing.
    RemoteIds,
    /// Incremental `modified_after` fetch.
    ModifiedAfter,
    /// Explicit `include` id-set fetch.
    Include,
}

/// Side-effect-only audit logging.
#[async_trait]
pub trait SyncLogger: Send + Sync {
    /// Documents newly added to the local store.
    async fn log_added_documents(&self, ids: &[u64], collection: &str);

    /// Documents updated in the local store.
    async fn log_updated_documents(&self, ids: &[u64], collection: &str);

    /// Documents removed from the local store.
    async fn log_removed_documents(&self, ids: &[u64], collection: &str);

    /// A response that violated the wire contract or partially failed.
    async fn log_invalid_response(&self, message: &str);

    /// Response metadata for a completed fetch.
    async fn log_fetch_status(&self, endpoint: &str, headers: &[(String, String)], kind: FetchKind);
}

/// Default logger forwarding to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

#[async_trait]
impl SyncLogger for TracingLogger {
    async fn log_added_documents(&self, ids: &[u64], collection: &str) {
        tracing::info!(collection, ?ids, "added documents");
    }

    async fn log_updated_documents(&self, ids: &[u64], collection: &str) {
        tracing::info!(collection, ?ids, "updated documents");
    }

    async fn log_removed_documents(&self, ids: &[u64], collection: &str) {
        tracing::info!(collection, ?ids, "removed documents");
    }

    async fn log_invalid_response(&self, message: &str) {
        tracing::warn!(message, "invalid response");
    }

    async fn log_fetch_status(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        kind: FetchKind,
    ) {
        tracing::debug!(endpoint, ?kind, header_count = headers.len(), "fetch completed");
    }
}

/// One recorded log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// Added document ids for a collection.
    Added(Vec<u64>, String),
    /// Updated document ids for a collection.
    Updated(Vec<u64>, String),
    /// Removed document ids for a collection.
    Removed(Vec<u64>, String),
    /// An invalid-response message.
    Invalid(String),
    /// A fetch-status report.
    Fetch(String, FetchKind),
}

/// A logger that records entries for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    /// Creates an empty recording logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries recorded so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl SyncLogger for RecordingLogger {
    async fn log_added_documents(&self, ids: &[u64], collection: &str) {
        self.entries
            .lock()
            .push(LogEntry::Added(ids.to_vec(), collection.to_string()));
    }

    async fn log_updated_documents(&self, ids: &[u64], collection: &str) {
        self.entries
            .lock()
            .push(LogEntry::Updated(ids.to_vec(), collection.to_string()));
    }

    async fn log_removed_documents(&self, ids: &[u64], collection: &str) {
        self.entries
            .lock()
            .push(LogEntry::Removed(ids.to_vec(), collection.to_string()));
    }

    async fn log_invalid_response(&self, message: &str) {
        self.entries.lock().push(LogEntry::Invalid(message.to_string()));
    }

    async fn log_fetch_status(
        &self,
        endpoint: &str,
        _headers: &[(String, String)],
        kind: FetchKind,
    ) {
        self.entries
            .lock()
            .push(LogEntry::Fetch(endpoint.to_string(), kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_logger_captures_entries() {
        let logger = RecordingLogger::new();
        logger.log_added_documents(&[1, 2], "products").await;
        logger.log_invalid_response("bad payload").await;

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], LogEntry::Added(vec![1, 2], "products".into()));
        assert_eq!(entries[1], LogEntry::Invalid("bad payload".into()));
    }
}
