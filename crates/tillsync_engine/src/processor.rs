//! Bulk insert/update/delete helper with modification-time-aware
//! filtering and audit logging.

use crate::collection::Collection;
use crate::error::EngineResult;
use crate::logger::SyncLogger;
use std::collections::HashMap;
use std::sync::Arc;
use tillsync_model::{timestamp, RemoteDocument};

/// Applies document batches to a collection, reporting every change to
/// the audit logger. Partial bulk failures are logged and swallowed; a
/// single bad document never blocks the rest of the batch.
pub struct DataProcessor {
    collection: Arc<dyn Collection>,
    logger: Arc<dyn SyncLogger>,
}

impl DataProcessor {
    /// Creates a processor for a collection.
    pub fn new(collection: Arc<dyn Collection>, logger: Arc<dyn SyncLogger>) -> Self {
        Self { collection, logger }
    }

    /// Bulk-inserts documents, returning the successfully inserted ids.
    pub async fn insert_new_documents(
        &self,
        documents: Vec<RemoteDocument>,
    ) -> EngineResult<Vec<u64>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let outcome = self.collection.bulk_insert(documents).await?;
        self.report_partial_failure(&outcome.error).await;
        if !outcome.success.is_empty() {
            self.logger
                .log_added_documents(&outcome.success, self.collection.name())
                .await;
        }
        Ok(outcome.success)
    }

    /// Bulk-upserts only documents strictly newer than the local copy,
    /// returning the successfully updated ids.
    ///
    /// Documents whose incoming `date_modified_gmt` is not newer than
    /// the matching entry in `local_by_id` are dropped, which is what
    /// protects a newer local edit from being clobbered by a stale
    /// server response.
    pub async fn update_existing_documents(
        &self,
        documents: Vec<RemoteDocument>,
        local_by_id: &HashMap<u64, RemoteDocument>,
    ) -> EngineResult<Vec<u64>> {
        let fresh: Vec<RemoteDocument> = documents
            .into_iter()
            .filter(|doc| match doc.id.and_then(|id| local_by_id.get(&id)) {
                Some(local) => timestamp::is_newer(doc.modified(), local.modified()),
                None => true,
            })
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        let outcome = self.collection.bulk_upsert(fresh).await?;
        self.report_partial_failure(&outcome.error).await;
        if !outcome.success.is_empty() {
            self.logger
                .log_updated_documents(&outcome.success, self.collection.name())
                .await;
        }
        Ok(outcome.success)
    }

    /// Removes documents by server id, returning the ids removed.
    pub async fn remove_documents_by_ids(&self, ids: &[u64]) -> EngineResult<Vec<u64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let removed = self.collection.remove_by_ids(ids).await?;
        if !removed.is_empty() {
            self.logger
                .log_removed_documents(&removed, self.collection.name())
                .await;
        }
        Ok(removed)
    }

    async fn report_partial_failure(&self, errors: &[String]) {
        for error in errors {
            tracing::warn!(collection = self.collection.name(), error, "bulk write failure");
            self.logger.log_invalid_response(error).await;
        }
    }
}
