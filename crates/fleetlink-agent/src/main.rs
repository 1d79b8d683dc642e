//! Fleetlink Agent Binary
//!
//! Connects to the relay and executes the commands it forwards.

use anyhow::{Context, Result};
use clap::Parser;
use fleetlink_agent::{capture_boot_args, wire, AgentSettings};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "fleetlink-agent", version, about = "Fleetlink agent")]
struct Args {
    /// Name the relay addresses this agent by
    #[arg(long, env = "AGENT_NAME")]
    name: String,

    /// Relay base URL
    #[arg(long, env = "RELAY_URL")]
    relay_url: String,

    /// Connection attempts before giving up
    #[arg(long, env = "MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Milliseconds between connection attempts
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 3000)]
    retry_delay_ms: u64,

    /// Milliseconds to wait for the relay's acknowledgment
    #[arg(long, env = "ACK_TIMEOUT_MS", default_value_t = 5000)]
    ack_timeout_ms: u64,

    /// Initial heartbeat interval in seconds
    #[arg(long, env = "SYNC_FREQUENCY", default_value_t = 30)]
    sync_frequency: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    capture_boot_args();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting Fleetlink agent {}", args.name);

    let settings = AgentSettings::new(args.name, args.relay_url)
        .with_retries(args.max_retries, Duration::from_millis(args.retry_delay_ms))
        .with_ack_timeout(Duration::from_millis(args.ack_timeout_ms))
        .with_sync_frequency(args.sync_frequency);

    let agent = wire(settings).await?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    agent
        .run(shutdown)
        .await
        .context("Agent could not stay connected to the relay")?;

    info!("Agent shutting down");
    Ok(())
}
