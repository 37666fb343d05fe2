//! # chat-sim
//!
//! Runs a chatcore broker with simulated sessions and producers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chat-sim
//!
//! # Run with a config file
//! chat-sim --config /path/to/chat-sim.toml
//!
//! # Run with environment overrides
//! CHAT_SIM_USERS=100 CHAT_SIM_PRODUCERS=8 chat-sim
//! ```

mod config;
mod metrics;
mod sim;

use anyhow::Result;
use chatcore::{Broker, CancellationToken};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatcore=debug,chat_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let context = CancellationToken::new();
    let broker = Broker::with_config(&context, config.broker.clone());
    let router = broker.spawn()?;

    let stop = CancellationToken::new();
    let simulation = tokio::spawn(sim::run(
        broker.clone(),
        config.simulation.clone(),
        stop.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutting down");

    context.cancel();
    broker.closed().await;
    stop.cancel();

    router.await?;
    simulation.await?;
    Ok(())
}
