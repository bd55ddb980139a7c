//! Persisted sync bookkeeping: the status ledger and the replication
//! side-record store.
//!
//! Both stores are kept distinct from the document collection: sync
//! bookkeeping survives collection rebuilds, and writes are all
//! upsert-style so no transaction or rollback machinery is needed.

use crate::error::EngineResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tillsync_model::{ReplicationMeta, SyncStatus, SyncStatusRecord};

/// The sync-status ledger: one row per `(id, endpoint)`.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Inserts or overwrites ledger rows.
    async fn upsert_many(&self, records: Vec<SyncStatusRecord>) -> EngineResult<()>;

    /// Lists rows for an endpoint, optionally filtered by status.
    async fn list(
        &self,
        endpoint: &str,
        status: Option<SyncStatus>,
    ) -> EngineResult<Vec<SyncStatusRecord>>;

    /// Removes rows for an endpoint by id, returning how many went.
    async fn remove(&self, endpoint: &str, ids: &[u64]) -> EngineResult<usize>;
}

/// The replication side-record store, keyed by identifier hash.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Loads the side-record for a replication identifier.
    async fn load(&self, key: &str) -> EngineResult<Option<ReplicationMeta>>;

    /// Saves the side-record for a replication identifier.
    async fn save(&self, key: &str, meta: &ReplicationMeta) -> EngineResult<()>;
}

/// In-memory status ledger.
#[derive(Debug, Default)]
pub struct MemoryStatusLedger {
    rows: RwLock<HashMap<(u64, String), SyncStatus>>,
}

impl MemoryStatusLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true when the ledger holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl StatusLedger for MemoryStatusLedger {
    async fn upsert_many(&self, records: Vec<SyncStatusRecord>) -> EngineResult<()> {
        let mut rows = self.rows.write();
        for record in records {
            rows.insert((record.id, record.endpoint), record.status);
        }
        Ok(())
    }

    async fn list(
        &self,
        endpoint: &str,
        status: Option<SyncStatus>,
    ) -> EngineResult<Vec<SyncStatusRecord>> {
        let mut records: Vec<SyncStatusRecord> = self
            .rows
            .read()
            .iter()
            .filter(|((_, ep), st)| ep == endpoint && status.is_none_or(|s| **st == s))
            .map(|((id, ep), st)| SyncStatusRecord::new(*id, ep.clone(), *st))
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn remove(&self, endpoint: &str, ids: &[u64]) -> EngineResult<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        for id in ids {
            rows.remove(&(*id, endpoint.to_string()));
        }
        Ok(before - rows.len())
    }
}

/// In-memory side-record store.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    records: RwLock<HashMap<String, ReplicationMeta>>,
}

impl MemoryMetaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn load(&self, key: &str) -> EngineResult<Option<ReplicationMeta>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn save(&self, key: &str, meta: &ReplicationMeta) -> EngineResult<()> {
        self.records.write().insert(key.to_string(), meta.clone());
        Ok(())
    }
}
