//! The collection collaborator: the local document store seam.

use crate::error::EngineResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tillsync_model::{BulkOutcome, RemoteDocument};
use uuid::Uuid;

/// A local document collection the engine replicates into.
///
/// The engine only reads and writes through these operations; it never
/// holds direct references to stored documents. All write operations
/// are upsert-style and idempotent.
#[async_trait]
pub trait Collection: Send + Sync {
    /// The collection name, used in audit logs.
    fn name(&self) -> &str;

    /// The declared local primary-key field.
    fn primary_key(&self) -> &str {
        "uuid"
    }

    /// Returns every document in the collection.
    async fn find_all(&self) -> EngineResult<Vec<RemoteDocument>>;

    /// Returns one page of documents sorted by server id. Documents
    /// without a server id sort last.
    async fn find_page(&self, offset: usize, limit: usize) -> EngineResult<Vec<RemoteDocument>>;

    /// Returns documents whose server id is in `ids`.
    async fn find_by_ids(&self, ids: &[u64]) -> EngineResult<Vec<RemoteDocument>>;

    /// Inserts documents that are not yet present.
    async fn bulk_insert(&self, docs: Vec<RemoteDocument>) -> EngineResult<BulkOutcome>;

    /// Inserts or replaces documents, matching on server id.
    async fn bulk_upsert(&self, docs: Vec<RemoteDocument>) -> EngineResult<BulkOutcome>;

    /// Removes documents by server id, returning the ids actually
    /// removed.
    async fn remove_by_ids(&self, ids: &[u64]) -> EngineResult<Vec<u64>>;

    /// Parses one raw REST response object into a document.
    fn parse_response(&self, raw: Value) -> EngineResult<RemoteDocument> {
        Ok(RemoteDocument::from_response(raw))
    }

    /// Resolves foreign-key references in freshly parsed documents.
    /// The default implementation is the identity.
    async fn resolve_references(
        &self,
        docs: Vec<RemoteDocument>,
    ) -> EngineResult<Vec<RemoteDocument>> {
        Ok(docs)
    }

    /// Returns true once the host has torn the collection down. The
    /// registry uses this to supersede replication instances bound to a
    /// dead collection.
    fn is_destroyed(&self) -> bool;
}

/// An in-memory collection for tests, diagnostics and the CLI dry-run.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    name: String,
    docs: RwLock<HashMap<Uuid, RemoteDocument>>,
    destroyed: AtomicBool,
}

impl MemoryCollection {
    /// Creates an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Seeds the collection with documents.
    pub fn seed(&self, docs: Vec<RemoteDocument>) {
        let mut map = self.docs.write();
        for doc in docs {
            map.insert(doc.uuid, doc);
        }
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Returns true when the collection holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Marks the collection as torn down.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    /// Returns the document with the given server id, if any.
    pub fn get_by_id(&self, id: u64) -> Option<RemoteDocument> {
        self.docs.read().values().find(|d| d.id == Some(id)).cloned()
    }

    fn sorted(&self) -> Vec<RemoteDocument> {
        let mut docs: Vec<_> = self.docs.read().values().cloned().collect();
        docs.sort_by_key(|d| d.id.unwrap_or(u64::MAX));
        docs
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_all(&self) -> EngineResult<Vec<RemoteDocument>> {
        Ok(self.sorted())
    }

    async fn find_page(&self, offset: usize, limit: usize) -> EngineResult<Vec<RemoteDocument>> {
        Ok(self.sorted().into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_ids(&self, ids: &[u64]) -> EngineResult<Vec<RemoteDocument>> {
        let wanted: HashSet<u64> = ids.iter().copied().collect();
        Ok(self
            .docs
            .read()
            .values()
            .filter(|d| d.id.is_some_and(|id| wanted.contains(&id)))
            .cloned()
            .collect())
    }

    async fn bulk_insert(&self, docs: Vec<RemoteDocument>) -> EngineResult<BulkOutcome> {
        let mut map = self.docs.write();
        let mut outcome = BulkOutcome::default();
        for doc in docs {
            let duplicate = doc
                .id
                .is_some_and(|id| map.values().any(|d| d.id == Some(id)));
            if duplicate {
                outcome
                    .error
                    .push(format!("id {:?}: already exists", doc.id));
                continue;
            }
            if let Some(id) = doc.id {
                outcome.success.push(id);
            }
            map.insert(doc.uuid, doc);
        }
        Ok(outcome)
    }

    async fn bulk_upsert(&self, docs: Vec<RemoteDocument>) -> EngineResult<BulkOutcome> {
        let mut map = self.docs.write();
        let mut outcome = BulkOutcome::default();
        for mut doc in docs {
            if let Some(id) = doc.id {
                if let Some(existing) = map.values().find(|d| d.id == Some(id)) {
                    // Keep the stable local primary key on replace.
                    doc.uuid = existing.uuid;
                }
                outcome.success.push(id);
            }
            map.insert(doc.uuid, doc);
        }
        Ok(outcome)
    }

    async fn remove_by_ids(&self, ids: &[u64]) -> EngineResult<Vec<u64>> {
        let wanted: HashSet<u64> = ids.iter().copied().collect();
        let mut map = self.docs.write();
        let victims: Vec<(Uuid, u64)> = map
            .values()
            .filter_map(|d| d.id.filter(|id| wanted.contains(id)).map(|id| (d.uuid, id)))
            .collect();
        let mut removed = Vec::with_capacity(victims.len());
        for (uuid, id) in victims {
            map.remove(&uuid);
            removed.push(id);
        }
        Ok(removed)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
