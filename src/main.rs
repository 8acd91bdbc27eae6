// filegrid - Distributed File Storage Platform
//
// Main entry point for a filegrid node. One binary hosts the cooperating
// services: the control plane (identity, key rotation, registry, audit), the
// ingest path (selection, upload, two-phase finalize), the configured
// storage elements, the query side (search, cache sync, ranged download),
// and the HTTP gateway over all of them.

use anyhow::Result;
use clap::Parser;
use filegrid::FilegridNode;
use filegrid_core::FilegridConfig;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "filegrid", about = "Distributed file storage platform node")]
struct Args {
    /// Path to a JSON or TOML configuration file. Defaults plus
    /// FILEGRID_-prefixed environment variables apply when omitted.
    #[arg(long, short)]
    config: Option<String>,

    /// Emit logs as JSON for aggregation pipelines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("filegrid=info".parse()?);
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("starting filegrid node");

    let config = FilegridConfig::load(args.config.as_deref())?;
    let node = match FilegridNode::new(config).await {
        Ok(node) => node,
        Err(err) => {
            error!(error = %err, "node initialization failed");
            return Err(err);
        }
    };

    node.start().await?;
    info!("filegrid node running; press Ctrl+C to stop");

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    node.stop().await?;
    Ok(())
}
