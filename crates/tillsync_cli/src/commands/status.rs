//! Status command implementation.

use tillsync_engine::{EngineConfig, ReplicationQuery, StatusLedger};

/// Runs a dry-run cycle and prints the resulting per-document sync
/// status rows.
pub async fn run(
    url: &str,
    auth: Option<(String, String)>,
    endpoint: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = super::client(url, auth)?;
    let dry = super::dry_run(client, endpoint, EngineConfig::new());

    dry.state.start(&ReplicationQuery::default()).await?;

    let rows = dry.ledger.list(endpoint, None).await?;
    if rows.is_empty() {
        println!("no sync status rows for {endpoint}");
        return Ok(());
    }
    let pending = rows.iter().filter(|row| row.status.needs_pull()).count();
    println!("{:<12} status", "id");
    for row in &rows {
        println!("{:<12} {:?}", row.id, row.status);
    }
    println!("{pending} of {} row(s) still pending a pull", rows.len());
    Ok(())
}
