//! The checkpoint-driven replication driver.
//!
//! Where [`crate::state::ReplicationState`] owns the HTTP mechanics for
//! one endpoint, [`Replication`] is the host-facing layer: it recomputes
//! a [`PullCheckpoint`] from live id diffs each cycle, delegates the
//! actual fetch to a [`PullHandler`], and bounds the pull loop so a
//! misbehaving handler can never spin the device forever. Hosts with
//! multiple instances over one store gate outbound traffic behind a
//! [`LeadershipProvider`].

use crate::collection::Collection;
use crate::error::EngineResult;
use crate::events::EventChannel;
use crate::leadership::LeadershipProvider;
use crate::ledger::{MetaStore, StatusLedger};
use crate::logger::SyncLogger;
use crate::processor::DataProcessor;
use crate::registry::replication_hash;
use crate::status::{is_sub_resource_endpoint, SyncStateManager};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tillsync_model::{
    timestamp, PullCheckpoint, RemoteDocument, ReplicationMeta, SyncStatus, SyncStatusRecord,
};

/// Hard cap on pull iterations within one `start()` call. A full final
/// page at the cap is left for the next trigger rather than looping on.
pub const MAX_PULL_ITERATIONS: u32 = 5;

/// Host-provided fetch overrides for one replication target.
#[async_trait]
pub trait ReplicationHooks: Send + Sync {
    /// Fetches the authoritative remote id listing.
    async fn fetch_remote_ids(&self) -> EngineResult<Vec<u64>>;

    /// Fetches the local documents in scope.
    async fn fetch_local_docs(
        &self,
        collection: &dyn Collection,
    ) -> EngineResult<Vec<RemoteDocument>> {
        collection.find_all().await
    }

    /// Names the id-listing scope these hooks serve. The persisted
    /// side-record is keyed by it, so hooks with different scopes never
    /// share a snapshot.
    fn scope(&self) -> String {
        "hooks".into()
    }
}

/// Fetches one batch of documents described by a checkpoint.
#[async_trait]
pub trait PullHandler: Send + Sync {
    /// Returns at most `batch_size` documents matching the checkpoint.
    async fn pull(
        &self,
        checkpoint: &PullCheckpoint,
        batch_size: usize,
    ) -> EngineResult<Vec<RemoteDocument>>;

    /// Transforms each fetched document before it is applied.
    fn modify(&self, doc: RemoteDocument) -> RemoteDocument {
        doc
    }
}

/// Pushes locally modified documents back to the server. Optional;
/// replication targets without one are pull-only.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Pushes documents, returning the server ids accepted.
    async fn push(&self, docs: Vec<RemoteDocument>) -> EngineResult<Vec<u64>>;
}

/// One replication target: a collection paired with its fetch hooks.
pub struct Replication {
    endpoint: String,
    meta_key: String,
    collection: Arc<dyn Collection>,
    hooks: Arc<dyn ReplicationHooks>,
    pull: Arc<dyn PullHandler>,
    push: Option<Arc<dyn PushHandler>>,
    leadership: Arc<dyn LeadershipProvider>,
    ledger: Arc<dyn StatusLedger>,
    meta: Arc<dyn MetaStore>,
    status: SyncStateManager,
    processor: DataProcessor,
    batch_size: usize,
    canceled: AtomicBool,
    remote_ids: RwLock<Option<Vec<u64>>>,
    re_sync: EventChannel<u64>,
}

impl Replication {
    /// Creates a pull-only replication with default batch size and the
    /// always-leader provider. Use the `with_*` builders to override.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: impl Into<String>,
        collection: Arc<dyn Collection>,
        hooks: Arc<dyn ReplicationHooks>,
        pull: Arc<dyn PullHandler>,
        ledger: Arc<dyn StatusLedger>,
        meta: Arc<dyn MetaStore>,
        logger: Arc<dyn SyncLogger>,
        leadership: Arc<dyn LeadershipProvider>,
    ) -> Self {
        let endpoint = endpoint.into();
        let meta_key = format!(
            "{:016x}",
            replication_hash(collection.name(), &endpoint, &hooks.scope())
        );
        let status = SyncStateManager::new(
            Arc::clone(&collection),
            Arc::clone(&ledger),
            Arc::clone(&logger),
            endpoint.clone(),
            !is_sub_resource_endpoint(&endpoint),
            1000,
        );
        let processor = DataProcessor::new(Arc::clone(&collection), Arc::clone(&logger));
        Self {
            endpoint,
            meta_key,
            collection,
            hooks,
            pull,
            push: None,
            leadership,
            ledger,
            meta,
            status,
            processor,
            batch_size: 10,
            canceled: AtomicBool::new(false),
            remote_ids: RwLock::new(None),
            re_sync: EventChannel::new(0),
        }
    }

    /// Attaches a push handler.
    pub fn with_push(mut self, push: Arc<dyn PushHandler>) -> Self {
        self.push = Some(push);
        self
    }

    /// Sets the pull batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The endpoint this target replicates.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Key under which this target's remote-ID snapshot is persisted.
    ///
    /// Derived from the replication identity hash with the hooks'
    /// scope folded in, so a hook-scoped listing never masquerades as
    /// the endpoint's full listing.
    pub fn meta_key(&self) -> &str {
        &self.meta_key
    }

    /// True once [`Self::cancel`] has been called.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// True if this target can no longer serve its collection and must
    /// be superseded by the registry.
    pub fn is_defunct(&self) -> bool {
        self.is_canceled() || self.collection.is_destroyed()
    }

    /// Cancels the target. One-way and idempotent; the re-sync channel
    /// is closed and spawned listeners wind down.
    pub fn cancel(&self) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.re_sync.close();
    }

    /// Refetches the remote id listing through the hooks and persists
    /// it as the replication side-record.
    pub async fn fetch_and_save_remote_ids(&self) -> EngineResult<Vec<u64>> {
        let ids = self.hooks.fetch_remote_ids().await?;
        self.meta
            .save(&self.meta_key, &ReplicationMeta::now(ids.clone()))
            .await?;
        *self.remote_ids.write() = Some(ids.clone());
        Ok(ids)
    }

    /// Recomputes the pull checkpoint from live diffs. Orphaned local
    /// documents are removed here, before the checkpoint is handed out.
    async fn checkpoint(&self, count: u32) -> EngineResult<PullCheckpoint> {
        let cached = { self.remote_ids.read().clone() };
        let remote_ids = match cached {
            Some(ids) => ids,
            None => self.fetch_and_save_remote_ids().await?,
        };
        let local_docs = self.hooks.fetch_local_docs(self.collection.as_ref()).await?;

        let remote: HashSet<u64> = remote_ids.iter().copied().collect();
        let local: HashSet<u64> = local_docs.iter().filter_map(|doc| doc.id).collect();

        let mut include: Vec<u64> = remote.difference(&local).copied().collect();
        include.sort_unstable();
        let mut exclude: Vec<u64> = local.intersection(&remote).copied().collect();
        exclude.sort_unstable();
        let mut remove: Vec<u64> = local.difference(&remote).copied().collect();
        remove.sort_unstable();

        if !remove.is_empty() && !is_sub_resource_endpoint(&self.endpoint) {
            tracing::warn!(
                endpoint = %self.endpoint,
                ?remove,
                "removing local documents no longer on the server"
            );
            self.processor.remove_documents_by_ids(&remove).await?;
        }

        let last_modified = timestamp::max_gmt(
            local_docs
                .iter()
                .filter(|doc| !matches!(doc.id, Some(id) if remove.contains(&id)))
                .map(|doc| doc.modified()),
        );

        Ok(PullCheckpoint {
            complete_initial_sync: include.is_empty(),
            include,
            exclude,
            last_modified,
            count,
        })
    }

    /// Runs one pull iteration and returns the fetched page size, which
    /// the pull loop uses to decide whether to continue.
    pub async fn run_pull(&self, count: u32) -> EngineResult<usize> {
        if self.is_canceled() {
            return Ok(0);
        }
        let checkpoint = self.checkpoint(count).await?;
        if checkpoint.is_settled() {
            return Ok(0);
        }

        let docs = self.pull.pull(&checkpoint, self.batch_size).await?;
        if self.is_canceled() {
            return Ok(0);
        }
        let fetched = docs.len();
        let docs: Vec<RemoteDocument> =
            docs.into_iter().map(|doc| self.pull.modify(doc)).collect();
        self.status.process_server_response(docs).await?;
        self.status.remove_stale_records().await?;
        Ok(fetched)
    }

    /// Waits for leadership, then pulls until a partial page or the
    /// iteration cap.
    pub async fn start(&self) -> EngineResult<()> {
        if self.is_canceled() {
            return Ok(());
        }
        self.leadership.wait_for_leadership().await;
        if self.is_canceled() {
            return Ok(());
        }

        let mut count = 0;
        loop {
            let page = self.run_pull(count).await?;
            count += 1;
            if page < self.batch_size {
                break;
            }
            if count >= MAX_PULL_ITERATIONS {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    "pull loop hit the iteration cap, deferring the rest"
                );
                break;
            }
        }
        Ok(())
    }

    /// Pushes locally modified documents, marking accepted ones synced.
    /// A target without a push handler returns an empty list.
    pub async fn run_push(&self) -> EngineResult<Vec<u64>> {
        let Some(push) = &self.push else {
            return Ok(Vec::new());
        };
        if self.is_canceled() {
            return Ok(Vec::new());
        }

        let rows = self
            .ledger
            .list(&self.endpoint, Some(SyncStatus::PushUpdate))
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<u64> = rows.iter().map(|row| row.id).collect();
        let docs = self.collection.find_by_ids(&ids).await?;
        let pushed = push.push(docs).await?;

        if !pushed.is_empty() {
            let records = pushed
                .iter()
                .map(|id| SyncStatusRecord::new(*id, self.endpoint.clone(), SyncStatus::Synced))
                .collect();
            self.ledger.upsert_many(records).await?;
        }
        Ok(pushed)
    }

    /// Requests a full re-sync: the cached remote id listing is dropped
    /// so the next cycle refetches it.
    pub fn trigger_re_sync(&self) {
        if self.is_canceled() {
            return;
        }
        let next = self.re_sync.latest().wrapping_add(1);
        self.re_sync.send(next);
    }

    /// Spawns a listener that runs a fresh cycle on every re-sync
    /// trigger. Holds only a weak handle, so dropping the last strong
    /// reference (or canceling) winds the listener down.
    pub fn spawn_re_sync_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut rx = self.re_sync.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(this) = weak.upgrade() else { break };
                if this.is_canceled() {
                    break;
                }
                *this.remote_ids.write() = None;
                if let Err(err) = this.start().await {
                    tracing::warn!(endpoint = %this.endpoint, %err, "re-sync cycle failed");
                }
            }
        });
    }

    /// Spawns an immediate background cycle.
    pub fn spawn_start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.start().await {
                tracing::warn!(endpoint = %this.endpoint, %err, "background cycle failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::config::EngineConfig;
    use crate::http::{MockRestClient, RestClient};
    use crate::leadership::{AlwaysLeader, ManualLeadership};
    use crate::ledger::{MemoryMetaStore, MemoryStatusLedger};
    use crate::logger::RecordingLogger;
    use crate::state::{strategy_for, ReplicationState};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn doc(id: u64, modified: &str) -> RemoteDocument {
        RemoteDocument {
            uuid: Uuid::new_v4(),
            id: Some(id),
            date_modified_gmt: Some(modified.into()),
            payload: json!({ "id": id, "date_modified_gmt": modified }),
        }
    }

    struct StaticHooks {
        ids: Vec<u64>,
    }

    #[async_trait]
    impl ReplicationHooks for StaticHooks {
        async fn fetch_remote_ids(&self) -> EngineResult<Vec<u64>> {
            Ok(self.ids.clone())
        }
    }

    /// Serves the first `batch_size` ids of the include list and records
    /// every checkpoint it was handed.
    #[derive(Default)]
    struct IncludePull {
        checkpoints: Mutex<Vec<PullCheckpoint>>,
    }

    #[async_trait]
    impl PullHandler for IncludePull {
        async fn pull(
            &self,
            checkpoint: &PullCheckpoint,
            batch_size: usize,
        ) -> EngineResult<Vec<RemoteDocument>> {
            self.checkpoints.lock().push(checkpoint.clone());
            Ok(checkpoint
                .include
                .iter()
                .take(batch_size)
                .map(|id| doc(*id, "2024-03-01T00:00:00"))
                .collect())
        }
    }

    struct Fixture {
        collection: Arc<MemoryCollection>,
        pull: Arc<IncludePull>,
        ledger: Arc<MemoryStatusLedger>,
        replication: Arc<Replication>,
    }

    fn fixture(remote_ids: Vec<u64>, batch_size: usize) -> Fixture {
        fixture_with_leadership(remote_ids, batch_size, Arc::new(AlwaysLeader))
    }

    fn fixture_with_leadership(
        remote_ids: Vec<u64>,
        batch_size: usize,
        leadership: Arc<dyn LeadershipProvider>,
    ) -> Fixture {
        let collection = Arc::new(MemoryCollection::new("products"));
        let pull = Arc::new(IncludePull::default());
        let ledger = Arc::new(MemoryStatusLedger::new());
        let replication = Arc::new(
            Replication::new(
                "products",
                Arc::clone(&collection) as Arc<dyn Collection>,
                Arc::new(StaticHooks { ids: remote_ids }),
                Arc::clone(&pull) as Arc<dyn PullHandler>,
                Arc::clone(&ledger) as Arc<dyn StatusLedger>,
                Arc::new(MemoryMetaStore::new()),
                Arc::new(RecordingLogger::new()),
                leadership,
            )
            .with_batch_size(batch_size),
        );
        Fixture {
            collection,
            pull,
            ledger,
            replication,
        }
    }

    #[tokio::test]
    async fn partial_page_ends_the_loop() {
        let fx = fixture(vec![1, 2, 3], 10);
        fx.replication.start().await.unwrap();

        assert_eq!(fx.pull.checkpoints.lock().len(), 1);
        assert_eq!(fx.collection.len(), 3);
    }

    #[tokio::test]
    async fn full_pages_stop_at_the_iteration_cap() {
        let fx = fixture((1..=100).collect(), 4);
        fx.replication.start().await.unwrap();

        let checkpoints = fx.pull.checkpoints.lock();
        assert_eq!(checkpoints.len(), MAX_PULL_ITERATIONS as usize);
        let counts: Vec<u32> = checkpoints.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![0, 1, 2, 3, 4]);
        // Five full batches landed; the rest waits for the next trigger.
        assert_eq!(fx.collection.len(), 20);
    }

    #[tokio::test]
    async fn checkpoint_shrinks_as_documents_land() {
        let fx = fixture(vec![1, 2, 3, 4], 2);
        fx.replication.start().await.unwrap();

        let checkpoints = fx.pull.checkpoints.lock();
        assert_eq!(checkpoints[0].include, vec![1, 2, 3, 4]);
        assert!(checkpoints[0].exclude.is_empty());
        assert_eq!(checkpoints[1].include, vec![3, 4]);
        assert_eq!(checkpoints[1].exclude, vec![1, 2]);
    }

    #[tokio::test]
    async fn hook_scoped_snapshot_never_feeds_the_endpoint_audit() {
        let meta = Arc::new(MemoryMetaStore::new());

        // A driver whose hooks serve a scoped subset of the endpoint.
        let driver_collection = Arc::new(MemoryCollection::new("products"));
        let replication = Replication::new(
            "products",
            Arc::clone(&driver_collection) as Arc<dyn Collection>,
            Arc::new(StaticHooks { ids: vec![10] }),
            Arc::new(IncludePull::default()) as Arc<dyn PullHandler>,
            Arc::new(MemoryStatusLedger::new()) as Arc<dyn StatusLedger>,
            Arc::clone(&meta) as Arc<dyn MetaStore>,
            Arc::new(RecordingLogger::new()),
            Arc::new(AlwaysLeader),
        );
        replication.fetch_and_save_remote_ids().await.unwrap();

        // An endpoint audit over the same meta store, holding three
        // valid local documents the server still lists.
        let http = Arc::new(MockRestClient::new());
        http.push_body(json!([{"id": 1}, {"id": 2}, {"id": 3}]));
        let collection = Arc::new(MemoryCollection::new("products"));
        collection.seed(vec![
            doc(1, "2024-03-01T00:00:00"),
            doc(2, "2024-03-01T00:00:00"),
            doc(3, "2024-03-01T00:00:00"),
        ]);
        let state = ReplicationState::new(
            "products",
            Arc::clone(&collection) as Arc<dyn Collection>,
            Arc::clone(&http) as Arc<dyn RestClient>,
            Arc::new(MemoryStatusLedger::new()),
            Arc::clone(&meta) as Arc<dyn MetaStore>,
            Arc::new(RecordingLogger::new()),
            strategy_for("products"),
            EngineConfig::new(),
        );
        state.audit().await.unwrap();

        // The audit fetched its own listing instead of adopting the
        // hook-scoped one, so no valid document was treated as an
        // orphan.
        assert_ne!(replication.meta_key(), state.meta_key());
        assert_eq!(http.call_count(), 1);
        assert_eq!(collection.len(), 3);
    }

    #[tokio::test]
    async fn orphans_are_removed_before_the_pull() {
        let fx = fixture(vec![1], 10);
        fx.collection.seed(vec![doc(9, "2024-03-01T00:00:00")]);

        fx.replication.start().await.unwrap();

        assert!(fx.collection.get_by_id(9).is_none());
        assert_eq!(fx.collection.len(), 1);
    }

    #[tokio::test]
    async fn settled_checkpoint_skips_the_pull_handler() {
        let fx = fixture(Vec::new(), 10);
        fx.replication.start().await.unwrap();
        assert!(fx.pull.checkpoints.lock().is_empty());
    }

    #[tokio::test]
    async fn start_waits_for_leadership() {
        let leadership = Arc::new(ManualLeadership::new());
        let fx = fixture_with_leadership(vec![1], 10, Arc::clone(&leadership) as _);

        let handle = {
            let replication = Arc::clone(&fx.replication);
            tokio::spawn(async move { replication.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fx.pull.checkpoints.lock().is_empty());

        leadership.grant();
        handle.await.unwrap().unwrap();
        assert_eq!(fx.collection.len(), 1);
    }

    #[tokio::test]
    async fn canceled_target_does_nothing() {
        let fx = fixture(vec![1, 2], 10);
        fx.replication.cancel();

        fx.replication.start().await.unwrap();
        fx.replication.trigger_re_sync();
        assert!(fx.pull.checkpoints.lock().is_empty());
        // Idempotent.
        fx.replication.cancel();
    }

    struct RecordingPush {
        pushed: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl PushHandler for RecordingPush {
        async fn push(&self, docs: Vec<RemoteDocument>) -> EngineResult<Vec<u64>> {
            let ids: Vec<u64> = docs.iter().filter_map(|d| d.id).collect();
            self.pushed.lock().extend(ids.iter().copied());
            Ok(ids)
        }
    }

    #[tokio::test]
    async fn push_marks_accepted_rows_synced() {
        let fx = fixture(vec![1, 2], 10);
        let push = Arc::new(RecordingPush {
            pushed: Mutex::new(Vec::new()),
        });
        let replication = Arc::new(
            Replication::new(
                "products",
                Arc::clone(&fx.collection) as Arc<dyn Collection>,
                Arc::new(StaticHooks { ids: vec![1, 2] }),
                Arc::clone(&fx.pull) as Arc<dyn PullHandler>,
                Arc::clone(&fx.ledger) as Arc<dyn StatusLedger>,
                Arc::new(MemoryMetaStore::new()),
                Arc::new(RecordingLogger::new()),
                Arc::new(AlwaysLeader),
            )
            .with_push(Arc::clone(&push) as Arc<dyn PushHandler>),
        );
        fx.collection.seed(vec![doc(1, "2024-03-05T00:00:00")]);
        fx.ledger
            .upsert_many(vec![SyncStatusRecord::new(
                1,
                "products",
                SyncStatus::PushUpdate,
            )])
            .await
            .unwrap();

        let pushed = replication.run_push().await.unwrap();
        assert_eq!(pushed, vec![1]);
        assert_eq!(*push.pushed.lock(), vec![1]);
        let rows = fx
            .ledger
            .list("products", Some(SyncStatus::Synced))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[tokio::test]
    async fn pull_only_target_push_is_a_no_op() {
        let fx = fixture(vec![1], 10);
        assert!(fx.replication.run_push().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_sync_trigger_runs_a_fresh_cycle() {
        let fx = fixture(vec![1, 2], 10);
        fx.replication.spawn_re_sync_listener();

        fx.replication.trigger_re_sync();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fx.collection.len(), 2);
    }
}
