//! The sync state manager: audit classification and response
//! application for one `(collection, endpoint)` pair.

use crate::collection::Collection;
use crate::error::EngineResult;
use crate::ledger::StatusLedger;
use crate::logger::SyncLogger;
use crate::processor::DataProcessor;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tillsync_model::{timestamp, AuditEntry, RemoteDocument, SyncStatus, SyncStatusRecord};

/// Returns true for sub-resource endpoints such as
/// `products/42/variations`, recognized by an interior numeric path
/// segment.
///
/// A full audit of a sub-resource endpoint only sees the ids scoped to
/// one parent, so a local document absent from that listing may simply
/// belong to another parent and must not be classified as deleted.
pub fn is_sub_resource_endpoint(endpoint: &str) -> bool {
    let segments: Vec<&str> = endpoint.split('/').collect();
    segments.len() >= 3
        && segments[1..segments.len() - 1]
            .iter()
            .any(|s| s.parse::<u64>().is_ok())
}

/// Maintains the per-document sync-status ledger for one endpoint.
///
/// All ledger rows for the endpoint are created and overwritten here,
/// during audits; replication reads them to decide what to fetch next.
pub struct SyncStateManager {
    collection: Arc<dyn Collection>,
    ledger: Arc<dyn StatusLedger>,
    logger: Arc<dyn SyncLogger>,
    processor: DataProcessor,
    endpoint: String,
    missing_is_deleted: bool,
    page_size: usize,
}

impl SyncStateManager {
    /// Creates a manager for an endpoint. `missing_is_deleted` is false
    /// for sub-resource endpoints (see [`is_sub_resource_endpoint`]).
    pub fn new(
        collection: Arc<dyn Collection>,
        ledger: Arc<dyn StatusLedger>,
        logger: Arc<dyn SyncLogger>,
        endpoint: impl Into<String>,
        missing_is_deleted: bool,
        page_size: usize,
    ) -> Self {
        let processor = DataProcessor::new(Arc::clone(&collection), Arc::clone(&logger));
        Self {
            collection,
            ledger,
            logger,
            processor,
            endpoint: endpoint.into(),
            missing_is_deleted,
            page_size,
        }
    }

    /// The endpoint this manager audits.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(&self, local: &RemoteDocument, server: Option<&AuditEntry>) -> Option<SyncStatus> {
        match server {
            None => {
                if self.missing_is_deleted {
                    Some(SyncStatus::PullDelete)
                } else {
                    None
                }
            }
            Some(entry) => Some(
                match timestamp::cmp_gmt(entry.date_modified_gmt.as_deref(), local.modified()) {
                    Ordering::Greater => SyncStatus::PullUpdate,
                    Ordering::Less => SyncStatus::PushUpdate,
                    Ordering::Equal => SyncStatus::Synced,
                },
            ),
        }
    }

    /// Audits the whole collection against the full server state.
    ///
    /// Pages through local documents sorted by id, classifying each one
    /// against the matching server entry. Server ids never matched by a
    /// local document become `PULL_NEW` afterwards. Tolerates an empty
    /// local collection (everything becomes `PULL_NEW`) and an empty
    /// server state (everything local becomes `PULL_DELETE`).
    pub async fn process_full_audit(&self, server_state: &[AuditEntry]) -> EngineResult<()> {
        let by_id: HashMap<u64, &AuditEntry> =
            server_state.iter().map(|entry| (entry.id, entry)).collect();
        let mut matched: HashSet<u64> = HashSet::new();

        let mut offset = 0;
        loop {
            let page = self.collection.find_page(offset, self.page_size).await?;
            let page_len = page.len();

            let mut records = Vec::with_capacity(page_len);
            for local in &page {
                // Documents without a server id have not been pushed
                // yet; there is no ledger key for them.
                let Some(id) = local.id else { continue };
                let server = by_id.get(&id).copied();
                if server.is_some() {
                    matched.insert(id);
                }
                if let Some(status) = self.classify(local, server) {
                    records.push(SyncStatusRecord::new(id, self.endpoint.clone(), status));
                }
            }
            if !records.is_empty() {
                self.ledger.upsert_many(records).await?;
            }

            if page_len < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        let fresh: Vec<SyncStatusRecord> = server_state
            .iter()
            .filter(|entry| !matched.contains(&entry.id))
            .map(|entry| SyncStatusRecord::new(entry.id, self.endpoint.clone(), SyncStatus::PullNew))
            .collect();
        if !fresh.is_empty() {
            self.ledger.upsert_many(fresh).await?;
        }
        Ok(())
    }

    /// Audits only the documents named in `server_state`, which the
    /// caller already filtered to records changed since the last audit.
    ///
    /// This path by construction only sees additions and updates, so it
    /// only ever produces `PULL_UPDATE` or `PULL_NEW`.
    pub async fn process_modified_after(&self, server_state: &[AuditEntry]) -> EngineResult<()> {
        if server_state.is_empty() {
            return Ok(());
        }
        let ids: Vec<u64> = server_state.iter().map(|entry| entry.id).collect();
        let local_by_id: HashMap<u64, RemoteDocument> = self
            .collection
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .filter_map(|doc| doc.id.map(|id| (id, doc)))
            .collect();

        let mut records = Vec::new();
        for entry in server_state {
            match local_by_id.get(&entry.id) {
                None => records.push(SyncStatusRecord::new(
                    entry.id,
                    self.endpoint.clone(),
                    SyncStatus::PullNew,
                )),
                Some(local) => {
                    if timestamp::is_newer(entry.date_modified_gmt.as_deref(), local.modified()) {
                        records.push(SyncStatusRecord::new(
                            entry.id,
                            self.endpoint.clone(),
                            SyncStatus::PullUpdate,
                        ));
                    }
                }
            }
        }
        if !records.is_empty() {
            self.ledger.upsert_many(records).await?;
        }
        Ok(())
    }

    /// Applies a batch of fetched documents to the local store.
    ///
    /// New documents are inserted; existing documents are upserted
    /// unless the local copy is strictly newer (a pending local edit
    /// must not be clobbered by a stale response). Every applied id is
    /// marked `SYNCED`. Partial bulk failures are logged, never thrown,
    /// and the whole operation is idempotent.
    pub async fn process_server_response(
        &self,
        documents: Vec<RemoteDocument>,
    ) -> EngineResult<Vec<u64>> {
        let ids: Vec<u64> = documents.iter().filter_map(|doc| doc.id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let local_by_id: HashMap<u64, RemoteDocument> = self
            .collection
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .filter_map(|doc| doc.id.map(|id| (id, doc)))
            .collect();

        let mut applied = if local_by_id.is_empty() {
            self.processor.insert_new_documents(documents).await?
        } else {
            let (existing, fresh): (Vec<_>, Vec<_>) = documents
                .into_iter()
                .partition(|doc| doc.id.is_some_and(|id| local_by_id.contains_key(&id)));
            let mut applied = self.processor.insert_new_documents(fresh).await?;
            applied.extend(
                self.processor
                    .update_existing_documents(existing, &local_by_id)
                    .await?,
            );
            applied
        };
        applied.sort_unstable();

        if !applied.is_empty() {
            let records = applied
                .iter()
                .map(|id| SyncStatusRecord::new(*id, self.endpoint.clone(), SyncStatus::Synced))
                .collect();
            self.ledger.upsert_many(records).await?;
        }
        Ok(applied)
    }

    /// Deletes every local document the ledger marks `PULL_DELETE` and
    /// clears those rows.
    ///
    /// A mismatch between the number of removed documents and cleared
    /// rows is logged as an error and processing continues; sync
    /// bookkeeping must never take the host down.
    pub async fn remove_stale_records(&self) -> EngineResult<Vec<u64>> {
        let stale = self
            .ledger
            .list(&self.endpoint, Some(SyncStatus::PullDelete))
            .await?;
        if stale.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<u64> = stale.iter().map(|record| record.id).collect();

        let removed = self.processor.remove_documents_by_ids(&ids).await?;
        let cleared = self.ledger.remove(&self.endpoint, &ids).await?;
        if removed.len() != cleared {
            tracing::error!(
                endpoint = %self.endpoint,
                removed = removed.len(),
                cleared,
                "stale record count mismatch"
            );
            self.logger
                .log_invalid_response(&format!(
                    "stale record mismatch on {}: {} documents removed, {} rows cleared",
                    self.endpoint,
                    removed.len(),
                    cleared
                ))
                .await;
        }
        Ok(removed)
    }

    /// Ids the server has that are not yet pulled (`PULL_NEW`).
    pub async fn unsynced_remote_ids(&self) -> EngineResult<Vec<u64>> {
        self.project(SyncStatus::PullNew).await
    }

    /// Ids whose local and server copies agree (`SYNCED`).
    pub async fn synced_remote_ids(&self) -> EngineResult<Vec<u64>> {
        self.project(SyncStatus::Synced).await
    }

    /// Ids with a newer server copy (`PULL_UPDATE`).
    pub async fn updated_remote_ids(&self) -> EngineResult<Vec<u64>> {
        self.project(SyncStatus::PullUpdate).await
    }

    async fn project(&self, status: SyncStatus) -> EngineResult<Vec<u64>> {
        Ok(self
            .ledger
            .list(&self.endpoint, Some(status))
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::ledger::MemoryStatusLedger;
    use crate::logger::RecordingLogger;
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn doc(id: u64, modified: &str) -> RemoteDocument {
        RemoteDocument {
            uuid: Uuid::new_v4(),
            id: Some(id),
            date_modified_gmt: Some(modified.into()),
            payload: json!({ "id": id }),
        }
    }

    struct Fixture {
        collection: Arc<MemoryCollection>,
        ledger: Arc<MemoryStatusLedger>,
        manager: SyncStateManager,
    }

    fn fixture(endpoint: &str) -> Fixture {
        let collection = Arc::new(MemoryCollection::new("products"));
        let ledger = Arc::new(MemoryStatusLedger::new());
        let manager = SyncStateManager::new(
            Arc::clone(&collection) as Arc<dyn Collection>,
            Arc::clone(&ledger) as Arc<dyn StatusLedger>,
            Arc::new(RecordingLogger::new()),
            endpoint,
            !is_sub_resource_endpoint(endpoint),
            1000,
        );
        Fixture {
            collection,
            ledger,
            manager,
        }
    }

    async fn status_of(ledger: &MemoryStatusLedger, endpoint: &str, id: u64) -> Option<SyncStatus> {
        ledger
            .list(endpoint, None)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }

    #[test]
    fn sub_resource_detection() {
        assert!(is_sub_resource_endpoint("products/42/variations"));
        assert!(!is_sub_resource_endpoint("products"));
        assert!(!is_sub_resource_endpoint("orders"));
        assert!(!is_sub_resource_endpoint("products/variations"));
    }

    #[tokio::test]
    async fn full_audit_classifies_all_cases() {
        let fx = fixture("products");
        fx.collection.seed(vec![
            doc(1, "2024-03-01T00:00:00"), // server newer
            doc(2, "2024-03-05T00:00:00"), // local newer
            doc(3, "2024-03-01T00:00:00"), // equal
            doc(4, "2024-03-01T00:00:00"), // absent on server
        ]);
        let server = vec![
            AuditEntry::new(1, Some("2024-03-02T00:00:00")),
            AuditEntry::new(2, Some("2024-03-02T00:00:00")),
            AuditEntry::new(3, Some("2024-03-01T00:00:00")),
            AuditEntry::new(5, Some("2024-03-02T00:00:00")), // missing locally
        ];

        fx.manager.process_full_audit(&server).await.unwrap();

        assert_eq!(status_of(&fx.ledger, "products", 1).await, Some(SyncStatus::PullUpdate));
        assert_eq!(status_of(&fx.ledger, "products", 2).await, Some(SyncStatus::PushUpdate));
        assert_eq!(status_of(&fx.ledger, "products", 3).await, Some(SyncStatus::Synced));
        assert_eq!(status_of(&fx.ledger, "products", 4).await, Some(SyncStatus::PullDelete));
        assert_eq!(status_of(&fx.ledger, "products", 5).await, Some(SyncStatus::PullNew));
    }

    #[tokio::test]
    async fn full_audit_with_empty_local_collection() {
        let fx = fixture("products");
        let server = vec![
            AuditEntry::new(1, Some("2024-03-01T00:00:00")),
            AuditEntry::new(2, Some("2024-03-01T00:00:00")),
        ];
        fx.manager.process_full_audit(&server).await.unwrap();
        assert_eq!(fx.manager.unsynced_remote_ids().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn full_audit_with_empty_server_state() {
        let fx = fixture("products");
        fx.collection
            .seed(vec![doc(1, "2024-03-01T00:00:00"), doc(2, "2024-03-01T00:00:00")]);
        fx.manager.process_full_audit(&[]).await.unwrap();
        assert_eq!(status_of(&fx.ledger, "products", 1).await, Some(SyncStatus::PullDelete));
        assert_eq!(status_of(&fx.ledger, "products", 2).await, Some(SyncStatus::PullDelete));
    }

    #[tokio::test]
    async fn sub_resource_absence_is_not_deletion() {
        let fx = fixture("products/42/variations");
        fx.collection.seed(vec![doc(1, "2024-03-01T00:00:00")]);
        fx.manager.process_full_audit(&[]).await.unwrap();
        assert_eq!(status_of(&fx.ledger, "products/42/variations", 1).await, None);
    }

    #[tokio::test]
    async fn modified_after_never_produces_push_or_delete() {
        let fx = fixture("products");
        fx.collection.seed(vec![
            doc(1, "2024-03-01T00:00:00"),
            doc(2, "2024-03-09T00:00:00"), // local newer than report
        ]);
        let server = vec![
            AuditEntry::new(1, Some("2024-03-02T00:00:00")),
            AuditEntry::new(2, Some("2024-03-02T00:00:00")),
            AuditEntry::new(3, Some("2024-03-02T00:00:00")),
        ];
        fx.manager.process_modified_after(&server).await.unwrap();

        assert_eq!(status_of(&fx.ledger, "products", 1).await, Some(SyncStatus::PullUpdate));
        assert_eq!(status_of(&fx.ledger, "products", 2).await, None);
        assert_eq!(status_of(&fx.ledger, "products", 3).await, Some(SyncStatus::PullNew));
    }

    #[tokio::test]
    async fn server_response_inserts_everything_when_nothing_matches() {
        let fx = fixture("products");
        let applied = fx
            .manager
            .process_server_response(vec![doc(1, "2024-03-01T00:00:00"), doc(2, "2024-03-01T00:00:00")])
            .await
            .unwrap();
        assert_eq!(applied, vec![1, 2]);
        assert_eq!(fx.collection.len(), 2);
        assert_eq!(fx.manager.synced_remote_ids().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn server_response_is_idempotent() {
        let fx = fixture("products");
        let batch = vec![doc(1, "2024-03-01T00:00:00"), doc(2, "2024-03-01T00:00:00")];

        fx.manager.process_server_response(batch.clone()).await.unwrap();
        fx.manager.process_server_response(batch).await.unwrap();

        assert_eq!(fx.collection.len(), 2);
        assert_eq!(fx.manager.synced_remote_ids().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn server_response_never_overwrites_newer_local_edit() {
        let fx = fixture("products");
        fx.collection.seed(vec![doc(1, "2024-03-09T00:00:00")]);

        fx.manager
            .process_server_response(vec![doc(1, "2024-03-02T00:00:00")])
            .await
            .unwrap();

        assert_eq!(
            fx.collection.get_by_id(1).unwrap().modified(),
            Some("2024-03-09T00:00:00")
        );
    }

    #[tokio::test]
    async fn remove_stale_records_exact_counts() {
        let fx = fixture("products");
        fx.collection.seed(vec![doc(5, "2024-03-01T00:00:00")]);
        fx.ledger
            .upsert_many(vec![SyncStatusRecord::new(5, "products", SyncStatus::PullDelete)])
            .await
            .unwrap();

        let removed = fx.manager.remove_stale_records().await.unwrap();
        assert_eq!(removed, vec![5]);
        assert!(fx.collection.is_empty());
        let leftover = fx
            .ledger
            .list("products", Some(SyncStatus::PullDelete))
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }

    fn ts(offset: i64) -> String {
        let base = chrono::DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z").unwrap();
        (base + chrono::Duration::seconds(offset))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }

    proptest! {
        #[test]
        fn classification_matches_timestamp_order(local in -300i64..300, server in -300i64..300) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let fx = fixture("products");
                fx.collection.seed(vec![doc(1, &ts(local))]);
                fx.manager
                    .process_full_audit(&[AuditEntry::new(1, Some(&ts(server)))])
                    .await
                    .unwrap();
                let expected = match server.cmp(&local) {
                    Ordering::Greater => SyncStatus::PullUpdate,
                    Ordering::Less => SyncStatus::PushUpdate,
                    Ordering::Equal => SyncStatus::Synced,
                };
                assert_eq!(status_of(&fx.ledger, "products", 1).await, Some(expected));
            });
        }
    }
}
