//! Fleetlink Relay Binary
//!
//! Accepts agent sessions and exposes the command forwarding API.

use anyhow::Result;
use clap::Parser;
use fleetlink_relay::{serve, spawn_ping_sweep, AppState, InMemoryConfigStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "fleetlink-relay", version, about = "Fleetlink relay server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:8081")]
    bind: String,

    /// Heartbeat interval in seconds returned to agents without stored config
    #[arg(long, env = "DEFAULT_SYNC_FREQUENCY", default_value_t = 30)]
    default_sync_frequency: i64,

    /// Seconds between ping sweeps over all agents, 0 disables
    #[arg(long, env = "PING_INTERVAL_SECS", default_value_t = 0)]
    ping_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting Fleetlink relay");

    let store = Arc::new(InMemoryConfigStore::new(args.default_sync_frequency));
    let state = AppState::new(store);
    let shutdown = CancellationToken::new();

    if args.ping_interval_secs > 0 {
        spawn_ping_sweep(
            state.relay.clone(),
            Duration::from_secs(args.ping_interval_secs),
            shutdown.clone(),
        );
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        signal.cancel();
    });

    serve(&args.bind, state, shutdown).await?;

    info!("Relay shutting down");
    Ok(())
}
