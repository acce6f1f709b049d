//! Timers that drive the simulation
//!
//! One task per train moves it and publishes its location; one shared task
//! publishes the whole fleet. Tasks are independent and keyed by train id so
//! they can be torn down explicitly.

use chrono::Utc;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::movement;
use super::registry::TrainRegistry;
use super::types::{LocationUpdate, TrainId};
use crate::broker::{BrokerClient, PublishOutcome};
use crate::config::SimConfig;

/// The registry as shared between timer tasks
pub type SharedRegistry = Arc<Mutex<TrainRegistry>>;

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub update_interval: Duration,
    pub bulk_interval: Duration,
    pub location_destination: String,
    pub bulk_destination: String,
    /// Seed for reproducible movement; each train gets `seed + index`
    pub seed: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_config(config: &SimConfig, seed: Option<u64>) -> Self {
        Self {
            update_interval: config.update_interval(),
            bulk_interval: config.bulk_interval(),
            location_destination: config.topics.location_destination.clone(),
            bulk_destination: config.topics.bulk_destination.clone(),
            seed,
        }
    }
}

/// Movement period for a train: `base / speed_factor`, floored to whole
/// milliseconds and never below 1ms
pub fn tick_interval(base: Duration, speed_factor: f64) -> Duration {
    if !(speed_factor.is_finite() && speed_factor > 0.0) {
        return base.max(MIN_TICK);
    }
    let millis = (base.as_millis() as f64 / speed_factor).floor();
    Duration::from_millis(millis as u64).max(MIN_TICK)
}

struct TrainTask {
    period: Duration,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    trains: HashMap<TrainId, TrainTask>,
    bulk: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn one movement task per train plus the bulk publisher
    pub async fn start(
        registry: SharedRegistry,
        client: BrokerClient,
        settings: SchedulerSettings,
    ) -> Self {
        let roster: Vec<(TrainId, f64)> = {
            let registry = registry.lock().await;
            registry
                .trains()
                .iter()
                .map(|t| (t.id.clone(), t.speed_factor))
                .collect()
        };

        let mut scheduler = Scheduler {
            trains: HashMap::new(),
            bulk: None,
        };
        if roster.is_empty() {
            warn!("No trains available for simulation");
            return scheduler;
        }

        info!("Starting simulation with {} trains", roster.len());
        for (index, (id, speed_factor)) in roster.into_iter().enumerate() {
            let period = tick_interval(settings.update_interval, speed_factor);
            let rng = match settings.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                None => StdRng::from_os_rng(),
            };
            debug!("Train {} ticks every {:?}", id, period);
            let handle = tokio::spawn(run_train(
                id.clone(),
                period,
                rng,
                registry.clone(),
                client.clone(),
                settings.location_destination.clone(),
            ));
            scheduler.trains.insert(id, TrainTask { period, handle });
        }

        scheduler.bulk = Some(tokio::spawn(run_bulk(
            settings.bulk_interval,
            registry,
            client,
            settings.bulk_destination,
        )));
        scheduler
    }

    /// Movement period assigned to a train, if it is scheduled
    pub fn period_of(&self, id: &TrainId) -> Option<Duration> {
        self.trains.get(id).map(|t| t.period)
    }

    pub fn train_task_count(&self) -> usize {
        self.trains.len()
    }

    pub fn is_running(&self) -> bool {
        self.bulk.is_some() || !self.trains.is_empty()
    }

    /// Cancel every timer task
    pub fn shutdown(&mut self) {
        for (_, task) in self.trains.drain() {
            task.handle.abort();
        }
        if let Some(bulk) = self.bulk.take() {
            bulk.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn periodic(period: Duration) -> time::Interval {
    // First tick fires one full period after start
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_train(
    id: TrainId,
    period: Duration,
    mut rng: StdRng,
    registry: SharedRegistry,
    client: BrokerClient,
    destination: String,
) {
    let mut ticker = periodic(period);
    loop {
        ticker.tick().await;

        let update = {
            let mut registry = registry.lock().await;
            let Some(train) = registry.get_mut(&id) else {
                warn!("Train {} left the registry; stopping its timer", id);
                return;
            };
            movement::advance(train, &mut rng);
            LocationUpdate::from_train(train, Utc::now())
        };

        // Movement continues while disconnected; those updates are simply lost
        if client.publish(&destination, &update) == PublishOutcome::Sent {
            debug!(
                "Train {} at ({:.6}, {:.6})",
                update.id, update.lat, update.lon
            );
        }
    }
}

async fn run_bulk(
    period: Duration,
    registry: SharedRegistry,
    client: BrokerClient,
    destination: String,
) {
    let mut ticker = periodic(period);
    loop {
        ticker.tick().await;
        let fleet = registry.lock().await;
        client.publish(&destination, fleet.trains());
    }
}
