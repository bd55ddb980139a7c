//! Per-endpoint replication orchestrator.
//!
//! A [`ReplicationState`] owns one `(collection, endpoint)` pair and
//! drives bounded pull cycles against the remote source of truth:
//! audit (refresh the remote-ID snapshot, diff against local ids,
//! delete orphans), then fetch (modified-after once the initial sync is
//! complete, explicit include list before that), then bulk-apply.
//!
//! Cycles within one instance are strictly serialized by the instance's
//! own `active`/`paused`/`canceled` flags; there is no preemption
//! between awaits, so no lock primitive is needed. Cancellation is
//! cooperative: an in-flight request is not aborted, but every
//! post-await continuation checks `is_stopped()` before applying side
//! effects.

use crate::collection::Collection;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EventChannel;
use crate::http::{RequestOptions, RestClient, RestResponse};
use crate::ledger::{MetaStore, StatusLedger};
use crate::logger::{FetchKind, SyncLogger};
use crate::processor::DataProcessor;
use crate::registry::replication_hash;
use crate::status::{is_sub_resource_endpoint, SyncStateManager};
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tillsync_model::{
    timestamp, RemoteDocument, ReplicationMeta, RestQuery, METHOD_OVERRIDE_HEADER,
};

/// The caller's view of what to replicate: UI-level filters passed
/// through to the REST query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationQuery {
    /// Free-text search filter.
    pub search: Option<String>,
    /// Sort key.
    pub orderby: Option<String>,
    /// Sort direction.
    pub order: Option<String>,
}

/// Per-endpoint behavior overrides, selected at construction time.
///
/// The default implementation covers top-level endpoints; sub-resource
/// endpoints (e.g. product variations) substitute their own fetch and
/// classification behavior instead of threading optional callbacks
/// through every method.
#[async_trait]
pub trait EndpointStrategy: Send + Sync {
    /// Fetches the full remote id listing for the endpoint.
    ///
    /// The response must be an array whose elements are numeric ids or
    /// objects carrying a numeric `id`; anything else is a
    /// [`EngineError::Validation`] surfaced to the caller, since it
    /// indicates a contract violation with the server.
    async fn fetch_remote_ids(
        &self,
        http: &dyn RestClient,
        endpoint: &str,
    ) -> EngineResult<Vec<u64>> {
        let options = RequestOptions::with_params(RestQuery::id_listing().to_params());
        let response = http.get(endpoint, &options).await?;
        parse_remote_ids(&response.data)
    }

    /// Fetches the local documents in scope for this endpoint.
    async fn fetch_local_docs(
        &self,
        collection: &dyn Collection,
    ) -> EngineResult<Vec<RemoteDocument>> {
        collection.find_all().await
    }

    /// Final say on the outgoing query. Returning `None` vetoes the
    /// fetch entirely and the cycle ends with no network call.
    fn filter_query_params(&self, query: &ReplicationQuery, base: RestQuery) -> Option<RestQuery> {
        Some(apply_query(base, query))
    }

    /// Whether absence from the remote id listing means the document
    /// was deleted on the server.
    fn missing_is_deleted(&self) -> bool {
        true
    }
}

/// Strategy for top-level endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEndpoint;

#[async_trait]
impl EndpointStrategy for DefaultEndpoint {}

/// Strategy for parameterized sub-resource endpoints such as
/// `products/42/variations`: the id listing is scoped to one parent, so
/// absence is not deletion.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubResourceEndpoint;

#[async_trait]
impl EndpointStrategy for SubResourceEndpoint {
    fn missing_is_deleted(&self) -> bool {
        false
    }
}

/// Picks the strategy matching the endpoint's path shape.
pub fn strategy_for(endpoint: &str) -> Arc<dyn EndpointStrategy> {
    if is_sub_resource_endpoint(endpoint) {
        Arc::new(SubResourceEndpoint)
    } else {
        Arc::new(DefaultEndpoint)
    }
}

fn apply_query(mut base: RestQuery, query: &ReplicationQuery) -> RestQuery {
    if let Some(search) = &query.search {
        base = base.with_search(search.clone());
    }
    if let Some(orderby) = &query.orderby {
        base.orderby = Some(orderby.clone());
    }
    if let Some(order) = &query.order {
        base.order = Some(order.clone());
    }
    base
}

/// Validates a remote id listing.
pub(crate) fn parse_remote_ids(data: &Value) -> EngineResult<Vec<u64>> {
    let items = data
        .as_array()
        .ok_or_else(|| EngineError::Validation("remote id listing is not an array".into()))?;
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let id = item
            .as_u64()
            .or_else(|| item.get("id").and_then(Value::as_u64))
            .ok_or_else(|| {
                EngineError::Validation(format!("remote id listing element is not numeric: {item}"))
            })?;
        ids.push(id);
    }
    Ok(ids)
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, EngineError>>>;

/// Deduplicates concurrent outbound requests.
///
/// Requests are keyed by a serialization of their parameters; a second
/// call with the same key while the first is outstanding joins the same
/// pending future and receives the identical resolved value. Entries
/// are removed once the operation settles, success or failure.
pub(crate) struct InflightMap<T> {
    inner: Mutex<HashMap<String, SharedFetch<T>>>,
}

impl<T> Default for InflightMap<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> InflightMap<T> {
    pub(crate) async fn run<F, Fut>(&self, key: String, make: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
    {
        let fut = {
            let mut map = self.inner.lock();
            match map.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let fut = make().boxed().shared();
                    map.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };
        let result = fut.clone().await;
        self.settle(&key, &fut);
        result
    }

    /// Removes `key` only while it still maps to `fut`. A waiter that
    /// resumes late, after a newer future has taken the key, must not
    /// evict that entry.
    fn settle(&self, key: &str, fut: &SharedFetch<T>) {
        let mut map = self.inner.lock();
        if map.get(key).is_some_and(|current| current.ptr_eq(fut)) {
            map.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Remote-ID snapshot and derived audit state for one instance.
#[derive(Debug, Clone, Default)]
struct AuditState {
    snapshot: Option<ReplicationMeta>,
    include: Vec<u64>,
    complete_initial_sync: bool,
    last_modified: Option<String>,
}

/// Resets the `active` flag when a cycle exits by any path.
struct ActiveGuard<'a>(&'a EventChannel<bool>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.send(false);
    }
}

/// The per-`(collection, endpoint)` replication orchestrator.
pub struct ReplicationState {
    endpoint: String,
    meta_key: String,
    collection: Arc<dyn Collection>,
    http: Arc<dyn RestClient>,
    meta: Arc<dyn MetaStore>,
    logger: Arc<dyn SyncLogger>,
    strategy: Arc<dyn EndpointStrategy>,
    config: EngineConfig,
    status: SyncStateManager,
    processor: DataProcessor,
    paused: AtomicBool,
    canceled: AtomicBool,
    active: EventChannel<bool>,
    errors: EventChannel<Option<String>>,
    remote_ids: EventChannel<Vec<u64>>,
    ids_inflight: InflightMap<Arc<Vec<u64>>>,
    pull_inflight: InflightMap<Arc<RestResponse>>,
    audit_state: RwLock<AuditState>,
}

impl ReplicationState {
    /// Creates an orchestrator for one endpoint. The strategy decides
    /// fetch scoping and whether absence means deletion.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: impl Into<String>,
        collection: Arc<dyn Collection>,
        http: Arc<dyn RestClient>,
        ledger: Arc<dyn StatusLedger>,
        meta: Arc<dyn MetaStore>,
        logger: Arc<dyn SyncLogger>,
        strategy: Arc<dyn EndpointStrategy>,
        config: EngineConfig,
    ) -> Self {
        let endpoint = endpoint.into();
        let meta_key = format!(
            "{:016x}",
            replication_hash(collection.name(), &endpoint, &endpoint)
        );
        let status = SyncStateManager::new(
            Arc::clone(&collection),
            ledger,
            Arc::clone(&logger),
            endpoint.clone(),
            strategy.missing_is_deleted(),
            config.audit_page_size,
        );
        let processor = DataProcessor::new(Arc::clone(&collection), Arc::clone(&logger));
        Self {
            endpoint,
            meta_key,
            collection,
            http,
            meta,
            logger,
            strategy,
            config,
            status,
            processor,
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            active: EventChannel::new(false),
            errors: EventChannel::new(None),
            remote_ids: EventChannel::new(Vec::new()),
            ids_inflight: InflightMap::default(),
            pull_inflight: InflightMap::default(),
            audit_state: RwLock::new(AuditState::default()),
        }
    }

    /// The endpoint this instance replicates.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Key under which this instance's remote-ID snapshot is persisted.
    ///
    /// Derived from the replication identity hash, so instances with
    /// different listing scopes never share a side-record even when
    /// they target the same endpoint path.
    pub fn meta_key(&self) -> &str {
        &self.meta_key
    }

    /// The sync-status manager for this endpoint.
    pub fn status(&self) -> &SyncStateManager {
        &self.status
    }

    /// True while a cycle is running.
    pub fn is_active(&self) -> bool {
        self.active.latest()
    }

    /// True once [`Self::cancel`] has been called.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// True if the instance must not start or continue a cycle.
    pub fn is_stopped(&self) -> bool {
        self.is_canceled() || self.paused.load(Ordering::SeqCst)
    }

    /// True if this instance can no longer serve its collection and
    /// must be superseded by the registry.
    pub fn is_defunct(&self) -> bool {
        self.is_canceled() || self.collection.is_destroyed()
    }

    /// Observes the active flag.
    pub fn subscribe_active(&self) -> tokio::sync::watch::Receiver<bool> {
        self.active.subscribe()
    }

    /// Observes cycle errors.
    pub fn subscribe_errors(&self) -> tokio::sync::watch::Receiver<Option<String>> {
        self.errors.subscribe()
    }

    /// Observes remote-ID snapshot refreshes.
    pub fn subscribe_remote_ids(&self) -> tokio::sync::watch::Receiver<Vec<u64>> {
        self.remote_ids.subscribe()
    }

    /// True once an audit has found no remote id missing locally; the
    /// next cycle switches to the modified-after strategy.
    pub fn complete_initial_sync(&self) -> bool {
        self.audit_state.read().complete_initial_sync
    }

    /// Starts a pull cycle. Clears a pending pause. Silent no-op on a
    /// canceled instance.
    pub async fn start(&self, query: &ReplicationQuery) -> EngineResult<()> {
        if self.is_canceled() {
            return Ok(());
        }
        self.paused.store(false, Ordering::SeqCst);
        self.run_pull(query).await
    }

    /// Resumes after a pause. Identical to [`Self::start`].
    pub async fn resume(&self, query: &ReplicationQuery) -> EngineResult<()> {
        self.start(query).await
    }

    /// Pauses the instance; the next `start`/`resume` clears it.
    pub fn pause(&self) {
        if !self.is_canceled() {
            self.paused.store(true, Ordering::SeqCst);
        }
    }

    /// Cancels the instance. One-way and idempotent: every event
    /// channel is closed exactly once and any later call into the
    /// instance is a silent no-op.
    pub fn cancel(&self) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.active.close();
        self.errors.close();
        self.remote_ids.close();
    }

    /// Audits the endpoint: refresh the remote-ID snapshot when stale,
    /// diff against local ids, delete orphans, recompute the include
    /// set and the modified-after watermark.
    pub async fn audit(&self) -> EngineResult<()> {
        if self.is_canceled() {
            return Ok(());
        }

        let cached = { self.audit_state.read().snapshot.clone() };
        let cached = match cached {
            Some(meta) => Some(meta),
            // Lazily pick up a snapshot persisted by a previous run.
            None => self.meta.load(&self.meta_key).await?,
        };
        let snapshot = match cached {
            Some(meta) if !meta.is_stale(self.config.remote_id_ttl) => meta,
            _ => self.refresh_remote_ids().await?,
        };
        if self.is_stopped() {
            return Ok(());
        }

        let local_docs = self
            .strategy
            .fetch_local_docs(self.collection.as_ref())
            .await?;
        if self.is_stopped() {
            return Ok(());
        }

        let remote: HashSet<u64> = snapshot.remote_ids.iter().copied().collect();
        let local: HashSet<u64> = local_docs.iter().filter_map(|doc| doc.id).collect();

        let mut include: Vec<u64> = remote.difference(&local).copied().collect();
        include.sort_unstable();
        // A scoped (sub-resource) listing says nothing about documents
        // outside its parent, so absence only means deletion for
        // top-level endpoints.
        let mut remove: Vec<u64> = if self.strategy.missing_is_deleted() {
            local.difference(&remote).copied().collect()
        } else {
            Vec::new()
        };
        remove.sort_unstable();

        if !remove.is_empty() {
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

        let mut state = self.audit_state.write();
        state.complete_initial_sync = include.is_empty();
        state.snapshot = Some(snapshot);
        state.include = include;
        state.last_modified = last_modified;
        Ok(())
    }

    /// Runs one pull cycle: audit, strategy selection, fetch, apply.
    ///
    /// The `active` flag is set on entry and reset on every exit path.
    /// Network errors are caught here, reported on the error channel
    /// and swallowed; the next triggered cycle naturally retries.
    /// Validation and storage errors are surfaced to the caller.
    pub async fn run_pull(&self, query: &ReplicationQuery) -> EngineResult<()> {
        if self.is_stopped() || self.is_active() {
            return Ok(());
        }
        self.active.send(true);
        let guard = ActiveGuard(&self.active);
        let result = self.pull_cycle(query).await;
        drop(guard);

        match result {
            Ok(()) => Ok(()),
            Err(err @ EngineError::Network { .. }) => {
                tracing::warn!(endpoint = %self.endpoint, %err, "pull cycle failed");
                self.errors.send(Some(err.to_string()));
                Ok(())
            }
            Err(EngineError::Cancelled) => Ok(()),
            Err(err) => {
                self.errors.send(Some(err.to_string()));
                Err(err)
            }
        }
    }

    // A stop observed mid-cycle surfaces as `Cancelled`, which
    // `run_pull` maps back to a clean no-op.
    async fn pull_cycle(&self, query: &ReplicationQuery) -> EngineResult<()> {
        self.audit().await?;
        if self.is_stopped() {
            return Err(EngineError::Cancelled);
        }

        let (include, complete, watermark) = {
            let state = self.audit_state.read();
            (
                state.include.clone(),
                state.complete_initial_sync,
                state.last_modified.clone(),
            )
        };

        let (base, kind) = if complete {
            match watermark {
                Some(watermark) => (
                    RestQuery::modified_after(watermark, self.config.pull_page_size),
                    FetchKind::ModifiedAfter,
                ),
                // Nothing missing and no watermark to advance from.
                None => return Ok(()),
            }
        } else {
            (
                RestQuery::include_ids(include, self.config.pull_page_size),
                FetchKind::Include,
            )
        };

        let Some(rest_query) = self.strategy.filter_query_params(query, base) else {
            return Ok(());
        };

        let response = self.fetch(&rest_query, kind).await?;
        if self.is_stopped() {
            return Err(EngineError::Cancelled);
        }
        self.logger
            .log_fetch_status(&self.endpoint, &response.headers, kind)
            .await;

        let docs = self.parse_documents(&response.data).await?;
        self.status.process_server_response(docs).await?;
        self.status.remove_stale_records().await?;
        Ok(())
    }

    async fn fetch(&self, query: &RestQuery, kind: FetchKind) -> EngineResult<Arc<RestResponse>> {
        let http = Arc::clone(&self.http);
        let endpoint = self.endpoint.clone();
        let params = query.to_params();

        if query.is_include_fetch() {
            let body = query.to_body();
            let key = format!("include:{endpoint}:{body}:{params:?}");
            self.pull_inflight
                .run(key, move || async move {
                    // Initial-sync fetches block the user-visible data
                    // path, so hint the transport to prioritize them.
                    let options = RequestOptions::with_params(params)
                        .header(METHOD_OVERRIDE_HEADER, "GET")
                        .priority("high");
                    http.post(&endpoint, body, &options).await.map(Arc::new)
                })
                .await
        } else {
            let key = format!("{kind:?}:{endpoint}:{params:?}");
            self.pull_inflight
                .run(key, move || async move {
                    let options = RequestOptions::with_params(params);
                    http.get(&endpoint, &options).await.map(Arc::new)
                })
                .await
        }
    }

    async fn refresh_remote_ids(&self) -> EngineResult<ReplicationMeta> {
        let key = format!("ids:{}", self.endpoint);
        let http = Arc::clone(&self.http);
        let strategy = Arc::clone(&self.strategy);
        let endpoint = self.endpoint.clone();

        let ids = self
            .ids_inflight
            .run(key, move || async move {
                strategy
                    .fetch_remote_ids(&*http, &endpoint)
                    .await
                    .map(Arc::new)
            })
            .await?;

        // The strategy surfaces only ids; there are no response
        // headers to report.
        self.logger
            .log_fetch_status(&self.endpoint, &[], FetchKind::RemoteIds)
            .await;

        let meta = ReplicationMeta::now((*ids).clone());
        self.meta.save(&self.meta_key, &meta).await?;
        self.remote_ids.send(meta.remote_ids.clone());
        Ok(meta)
    }

    async fn parse_documents(&self, data: &Value) -> EngineResult<Vec<RemoteDocument>> {
        let items = data
            .as_array()
            .ok_or_else(|| EngineError::Validation("expected a document array".into()))?;
        let mut docs = Vec::with_capacity(items.len());
        for item in items {
            match self.collection.parse_response(item.clone()) {
                Ok(doc) => docs.push(doc),
                Err(err) => self.logger.log_invalid_response(&err.to_string()).await,
            }
        }
        self.collection.resolve_references(docs).await
    }
}
