use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use train_sim::broker::{BrokerSettings, WsConnector};
use train_sim::config::SimConfig;
use train_sim::diagnostics::Diagnostics;
use train_sim::runner;
use train_sim::simulation::HttpTrainSource;

#[derive(Parser)]
#[command(name = "train_sim")]
#[command(about = "Train position simulator publishing to a STOMP broker")]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the broker WebSocket URL
    #[arg(long)]
    broker_url: Option<String>,

    /// Override the backend endpoint serving the train list
    #[arg(long)]
    trains_url: Option<String>,

    /// Seed for reproducible movement
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = SimConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.broker_url {
        config.broker_url = url;
    }
    if let Some(url) = cli.trains_url {
        config.trains_url = url;
    }
    config.validate().context("Invalid configuration")?;

    run(config, cli.seed).await
}

async fn run(config: SimConfig, seed: Option<u64>) -> Result<()> {
    let diagnostics = Arc::new(Diagnostics::new());
    let heartbeat = BrokerSettings::from_config(&config).heartbeat;
    let connector = Arc::new(WsConnector::new(config.broker_url.clone(), heartbeat));
    let client = runner::connect_broker(&config, connector, diagnostics.clone());
    let source = HttpTrainSource::new(config.trains_url.clone(), config.fetch_timeout())
        .context("Failed to build HTTP client")?;

    let started = tokio::select! {
        started = runner::start_simulation(&client, &source, &config, &diagnostics, seed) => started,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            client.shutdown();
            return Ok(());
        }
    };

    let mut simulation = match started {
        Ok(simulation) => simulation,
        Err(e) => {
            // The process stays up, but nothing will be simulated
            error!("Simulation not started: {}", e);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            client.shutdown();
            return Ok(());
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    simulation.shutdown();
    client.shutdown();
    Ok(())
}
