//! CLI command implementations.

pub mod audit;
pub mod pull;
pub mod status;

use std::sync::Arc;
use std::time::Duration;
use tillsync_engine::{
    strategy_for, Collection, EngineConfig, MemoryCollection, MemoryMetaStore, MemoryStatusLedger,
    MetaStore, ReplicationState, RestClient, StatusLedger, TracingLogger,
};
use tillsync_http::{HttpConfig, ReqwestClient};

/// Builds the HTTP client from command-line connection settings.
pub(crate) fn client(
    url: &str,
    auth: Option<(String, String)>,
) -> Result<ReqwestClient, Box<dyn std::error::Error>> {
    let mut config = HttpConfig::new(url).with_timeout(Duration::from_secs(30));
    if let Some((key, secret)) = auth {
        config = config.with_auth(key, secret);
    }
    Ok(ReqwestClient::new(config)?)
}

/// A replication instance over throwaway in-memory stores, used by the
/// dry-run commands.
pub(crate) struct DryRun {
    pub collection: Arc<MemoryCollection>,
    pub ledger: Arc<MemoryStatusLedger>,
    pub state: ReplicationState,
}

pub(crate) fn dry_run(client: ReqwestClient, endpoint: &str, config: EngineConfig) -> DryRun {
    let collection = Arc::new(MemoryCollection::new(endpoint));
    let ledger = Arc::new(MemoryStatusLedger::new());
    let state = ReplicationState::new(
        endpoint,
        Arc::clone(&collection) as Arc<dyn Collection>,
        Arc::new(client) as Arc<dyn RestClient>,
        Arc::clone(&ledger) as Arc<dyn StatusLedger>,
        Arc::new(MemoryMetaStore::new()) as Arc<dyn MetaStore>,
        Arc::new(TracingLogger),
        strategy_for(endpoint),
        config,
    );
    DryRun {
        collection,
        ledger,
        state,
    }
}
