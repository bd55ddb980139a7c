//! Pull command implementation.

use tillsync_engine::{EngineConfig, ReplicationQuery, StatusLedger};
use tillsync_model::SyncStatus;

/// Runs one full pull cycle against a throwaway in-memory store and
/// prints what landed.
pub async fn run(
    url: &str,
    auth: Option<(String, String)>,
    endpoint: &str,
    batch_size: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = super::client(url, auth)?;
    let config = EngineConfig::new().with_pull_page_size(batch_size);
    let dry = super::dry_run(client, endpoint, config);

    dry.state.start(&ReplicationQuery::default()).await?;

    let synced = dry.ledger.list(endpoint, Some(SyncStatus::Synced)).await?;
    println!("endpoint:  {endpoint}");
    println!("fetched:   {} documents", dry.collection.len());
    println!("synced:    {} ledger rows", synced.len());
    println!(
        "initial sync complete: {}",
        dry.state.complete_initial_sync()
    );
    Ok(())
}
