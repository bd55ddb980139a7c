//! Integration tests driving full replication cycles against an
//! in-memory REST server.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tillsync_engine::{
    strategy_for, Collection, EngineConfig, EngineResult, MemoryCollection, MemoryMetaStore,
    MemoryStatusLedger, RecordingLogger, ReplicationQuery, ReplicationState, RequestOptions,
    RestClient, RestResponse, StatusLedger,
};
use tillsync_model::{SyncStatus, METHOD_OVERRIDE_HEADER};

/// A REST client backed by an in-memory document store, answering the
/// three query shapes the engine issues: id listings, modified-after
/// fetches and method-override include fetches.
struct InMemoryServer {
    docs: Mutex<BTreeMap<u64, Value>>,
    calls: AtomicUsize,
}

impl InMemoryServer {
    fn new() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn put(&self, id: u64, modified: &str, name: &str) {
        self.docs.lock().insert(
            id,
            json!({ "id": id, "date_modified_gmt": modified, "name": name }),
        );
    }

    fn delete(&self, id: u64) {
        self.docs.lock().remove(&id);
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn param<'a>(options: &'a RequestOptions, name: &str) -> Option<&'a str> {
        options
            .params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
impl RestClient for InMemoryServer {
    async fn get(&self, _path: &str, options: &RequestOptions) -> EngineResult<RestResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.lock();

        if options.params.iter().any(|(key, _)| key == "fields[]") {
            let listing: Vec<Value> = docs.keys().map(|id| json!({ "id": id })).collect();
            return Ok(RestResponse::body(Value::Array(listing)));
        }

        if let Some(watermark) = Self::param(options, "modified_after") {
            // Inclusive boundary on purpose: real servers hand back the
            // watermark row again and the engine must tolerate it.
            let matching: Vec<Value> = docs
                .values()
                .filter(|doc| {
                    doc["date_modified_gmt"]
                        .as_str()
                        .is_some_and(|m| m >= watermark)
                })
                .cloned()
                .collect();
            return Ok(RestResponse::body(Value::Array(matching)));
        }

        Ok(RestResponse::body(Value::Array(
            docs.values().cloned().collect(),
        )))
    }

    async fn post(
        &self,
        _path: &str,
        body: Value,
        options: &RequestOptions,
    ) -> EngineResult<RestResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(
            options
                .headers
                .iter()
                .any(|(name, value)| name == METHOD_OVERRIDE_HEADER && value == "GET"),
            "include fetches must carry the method-override header"
        );

        let include: Vec<u64> = body["include"]
            .as_str()
            .unwrap_or_default()
            .split(',')
            .filter_map(|id| id.parse().ok())
            .collect();
        let docs = self.docs.lock();
        let matching: Vec<Value> = include
            .iter()
            .filter_map(|id| docs.get(id).cloned())
            .collect();
        Ok(RestResponse::body(Value::Array(matching)))
    }
}

struct Harness {
    server: Arc<InMemoryServer>,
    collection: Arc<MemoryCollection>,
    ledger: Arc<MemoryStatusLedger>,
    state: ReplicationState,
}

fn harness(endpoint: &str) -> Harness {
    let server = Arc::new(InMemoryServer::new());
    let collection = Arc::new(MemoryCollection::new("products"));
    let ledger = Arc::new(MemoryStatusLedger::new());
    let state = ReplicationState::new(
        endpoint,
        Arc::clone(&collection) as Arc<dyn Collection>,
        Arc::clone(&server) as Arc<dyn RestClient>,
        Arc::clone(&ledger) as Arc<dyn StatusLedger>,
        Arc::new(MemoryMetaStore::new()),
        Arc::new(RecordingLogger::new()),
        strategy_for(endpoint),
        // A zero TTL forces every audit to refetch the id listing, so
        // server-side deletions show up on the next cycle.
        EngineConfig::new().with_remote_id_ttl(Duration::ZERO),
    );
    Harness {
        server,
        collection,
        ledger,
        state,
    }
}

#[tokio::test]
async fn initial_sync_converges_and_marks_rows_synced() {
    let h = harness("products");
    h.server.put(1, "2024-03-01T10:00:00", "Espresso");
    h.server.put(2, "2024-03-01T11:00:00", "Latte");
    h.server.put(3, "2024-03-01T12:00:00", "Flat White");

    h.state.start(&ReplicationQuery::default()).await.unwrap();

    assert_eq!(h.collection.len(), 3);
    assert_eq!(h.collection.get_by_id(2).unwrap().payload["name"], "Latte");
    let synced = h
        .ledger
        .list("products", Some(SyncStatus::Synced))
        .await
        .unwrap();
    assert_eq!(
        synced.iter().map(|row| row.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // The flag flips on the next audit, once nothing is missing.
    h.state.audit().await.unwrap();
    assert!(h.state.complete_initial_sync());
}

#[tokio::test]
async fn server_edit_lands_via_modified_after() {
    let h = harness("products");
    h.server.put(1, "2024-03-01T10:00:00", "Espresso");
    h.state.start(&ReplicationQuery::default()).await.unwrap();

    h.server.put(1, "2024-03-02T09:00:00", "Double Espresso");
    h.state.start(&ReplicationQuery::default()).await.unwrap();

    let local = h.collection.get_by_id(1).unwrap();
    assert_eq!(local.payload["name"], "Double Espresso");
    assert_eq!(local.modified(), Some("2024-03-02T09:00:00"));
}

#[tokio::test]
async fn boundary_duplicates_do_not_rewrite_local_documents() {
    let h = harness("products");
    h.server.put(1, "2024-03-01T10:00:00", "Espresso");
    h.state.start(&ReplicationQuery::default()).await.unwrap();
    let original_uuid = h.collection.get_by_id(1).unwrap().uuid;

    // The inclusive modified-after filter returns document 1 again with
    // an unchanged timestamp; it must not be rewritten.
    h.state.start(&ReplicationQuery::default()).await.unwrap();

    let local = h.collection.get_by_id(1).unwrap();
    assert_eq!(local.uuid, original_uuid);
    assert_eq!(local.modified(), Some("2024-03-01T10:00:00"));
}

#[tokio::test]
async fn server_deletion_propagates_on_the_next_audit() {
    let h = harness("products");
    h.server.put(1, "2024-03-01T10:00:00", "Espresso");
    h.server.put(2, "2024-03-01T11:00:00", "Latte");
    h.state.start(&ReplicationQuery::default()).await.unwrap();
    assert_eq!(h.collection.len(), 2);

    h.server.delete(2);
    h.state.start(&ReplicationQuery::default()).await.unwrap();

    assert!(h.collection.get_by_id(2).is_none());
    assert_eq!(h.collection.len(), 1);
}

#[tokio::test]
async fn sub_resource_absence_is_not_deletion() {
    let h = harness("products/7/variations");
    h.server.put(11, "2024-03-01T10:00:00", "Small");
    h.server.put(12, "2024-03-01T11:00:00", "Large");
    // A variation belonging to a different parent product.
    h.collection.seed(vec![tillsync_model::RemoteDocument {
        uuid: uuid::Uuid::new_v4(),
        id: Some(99),
        date_modified_gmt: Some("2024-03-01T09:00:00".into()),
        payload: json!({ "id": 99, "date_modified_gmt": "2024-03-01T09:00:00" }),
    }]);

    h.state.start(&ReplicationQuery::default()).await.unwrap();

    assert!(h.collection.get_by_id(99).is_some());
    assert_eq!(h.collection.len(), 3);
}

#[tokio::test]
async fn canceled_instance_never_touches_the_network() {
    let h = harness("products");
    h.server.put(1, "2024-03-01T10:00:00", "Espresso");
    h.state.cancel();

    h.state.start(&ReplicationQuery::default()).await.unwrap();
    h.state.audit().await.unwrap();

    assert_eq!(h.server.call_count(), 0);
    assert!(h.collection.is_empty());
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let h = harness("products");
    h.server.put(1, "2024-03-01T10:00:00", "Espresso");
    h.server.put(2, "2024-03-01T11:00:00", "Latte");

    h.state.start(&ReplicationQuery::default()).await.unwrap();
    h.state.start(&ReplicationQuery::default()).await.unwrap();
    h.state.start(&ReplicationQuery::default()).await.unwrap();

    assert_eq!(h.collection.len(), 2);
    let synced = h
        .ledger
        .list("products", Some(SyncStatus::Synced))
        .await
        .unwrap();
    assert_eq!(synced.len(), 2);
}
