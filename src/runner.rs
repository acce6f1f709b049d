//! Startup sequence for a simulation run
//!
//! The broker client is started first. The train list is loaded and the
//! timers started once the first session is up, and only then. Later
//! reconnects replay subscriptions and nothing else.

use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::broker::{json_logger, BrokerClient, BrokerError, BrokerSettings, Connector};
use crate::config::SimConfig;
use crate::diagnostics::Diagnostics;
use crate::simulation::{Scheduler, SchedulerSettings, SharedRegistry, TrainRegistry, TrainSource};

/// A running simulation: the shared trains and the timers moving them
pub struct Simulation {
    pub registry: SharedRegistry,
    pub scheduler: Scheduler,
}

impl Simulation {
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Build the broker client, register the standard subscriptions and start
/// connecting
pub fn connect_broker(
    config: &SimConfig,
    connector: Arc<dyn Connector>,
    diagnostics: Arc<Diagnostics>,
) -> BrokerClient {
    let client = BrokerClient::new(
        BrokerSettings::from_config(config),
        connector,
        diagnostics.clone(),
    );
    client.subscribe(
        &config.topics.location_topic,
        json_logger("Current train location", diagnostics.clone()),
    );
    client.subscribe(
        &config.topics.trains_topic,
        json_logger("Received trains data", diagnostics),
    );

    info!("Connecting to {}", config.broker_url);
    client.start();
    client
}

/// Wait for the first session, then load the trains and start their timers
///
/// Fails only when the broker retry budget runs out before any connect
/// succeeds.
pub async fn start_simulation(
    client: &BrokerClient,
    source: &dyn TrainSource,
    config: &SimConfig,
    diagnostics: &Diagnostics,
    seed: Option<u64>,
) -> Result<Simulation, BrokerError> {
    client.wait_connected().await?;

    let registry = TrainRegistry::load(source, config, diagnostics).await;
    let registry: SharedRegistry = Arc::new(Mutex::new(registry));
    let scheduler = Scheduler::start(
        registry.clone(),
        client.clone(),
        SchedulerSettings::from_config(config, seed),
    )
    .await;

    Ok(Simulation {
        registry,
        scheduler,
    })
}
