//! Audit command implementation.

use tillsync_engine::{strategy_for, RestClient};

/// Fetches the remote id listing for an endpoint and prints a summary.
pub async fn run(
    url: &str,
    auth: Option<(String, String)>,
    endpoint: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = super::client(url, auth)?;
    let strategy = strategy_for(endpoint);
    let ids = strategy
        .fetch_remote_ids(&client as &dyn RestClient, endpoint)
        .await?;

    println!("endpoint:   {endpoint}");
    println!("remote ids: {}", ids.len());
    if let (Some(first), Some(last)) = (ids.iter().min(), ids.iter().max()) {
        println!("id range:   {first}..={last}");
    }
    Ok(())
}
