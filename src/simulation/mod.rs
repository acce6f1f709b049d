//! Train simulation
//!
//! The registry of trains, their movement and the timers that drive them.
//! Publishing goes through [`crate::broker::BrokerClient`].

mod movement;
mod registry;
mod scheduler;
mod types;

pub use movement::{advance, advance_with, MovementNoise, BASE_STEP, LAT_JITTER, LON_DRIFT};
pub use registry::{fallback_trains, FetchError, HttpTrainSource, TrainRegistry, TrainSource};
pub use scheduler::{tick_interval, Scheduler, SchedulerSettings, SharedRegistry};
pub use types::{Coordinates, LocationUpdate, Train, TrainId, TrainRecord};
