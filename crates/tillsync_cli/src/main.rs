//! TillSync CLI
//!
//! Command-line tools for inspecting a remote replication target.
//!
//! # Commands
//!
//! - `audit` - Fetch the remote id listing and summarize it
//! - `pull` - Dry-run a full pull cycle into an in-memory store
//! - `status` - Show per-document sync status after a dry-run cycle

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// TillSync replication inspection tools.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the remote REST API
    #[arg(global = true, short, long)]
    url: Option<String>,

    /// API key for basic auth
    #[arg(global = true, long)]
    key: Option<String>,

    /// API secret for basic auth
    #[arg(global = true, long)]
    secret: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the remote id listing and summarize it
    Audit {
        /// Endpoint to audit, e.g. "products"
        endpoint: String,
    },

    /// Dry-run a full pull cycle into an in-memory store
    Pull {
        /// Endpoint to pull, e.g. "products"
        endpoint: String,

        /// Server page size per fetch
        #[arg(short, long, default_value = "10")]
        batch_size: i64,
    },

    /// Show per-document sync status after a dry-run cycle
    Status {
        /// Endpoint to inspect, e.g. "products"
        endpoint: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let url = cli.url.ok_or("Remote URL required (--url)")?;
    let auth = match (cli.key, cli.secret) {
        (Some(key), Some(secret)) => Some((key, secret)),
        _ => None,
    };

    match cli.command {
        Commands::Audit { endpoint } => {
            commands::audit::run(&url, auth, &endpoint).await?;
        }
        Commands::Pull {
            endpoint,
            batch_size,
        } => {
            commands::pull::run(&url, auth, &endpoint, batch_size).await?;
        }
        Commands::Status { endpoint } => {
            commands::status::run(&url, auth, &endpoint).await?;
        }
    }
    Ok(())
}
