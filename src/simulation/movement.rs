//! Per-tick train movement
//!
//! Each tick nudges a train by a deterministic step scaled by its speed factor,
//! plus symmetric jitter in latitude and forward-only drift in longitude.
//! Coordinates are never clamped: trains drift indefinitely and there is no
//! notion of arriving at `destination_place`.

use rand::Rng;

use super::types::Train;

/// Deterministic step per tick, multiplied by the speed factor
pub const BASE_STEP: f64 = 0.00001;

/// Latitude jitter is drawn from `[-LAT_JITTER, LAT_JITTER)`
pub const LAT_JITTER: f64 = 0.000025;

/// Longitude drift is drawn from `[0, LON_DRIFT)`
pub const LON_DRIFT: f64 = 0.00001;

/// The random part of a single movement step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementNoise {
    pub lat_jitter: f64,
    pub lon_drift: f64,
}

impl MovementNoise {
    /// No randomness; movement becomes purely a function of speed factor
    pub const ZERO: MovementNoise = MovementNoise {
        lat_jitter: 0.0,
        lon_drift: 0.0,
    };

    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            lat_jitter: rng.random_range(-LAT_JITTER..LAT_JITTER),
            lon_drift: rng.random_range(0.0..LON_DRIFT),
        }
    }
}

/// Move a train one tick using the given noise
pub fn advance_with(train: &mut Train, noise: MovementNoise) {
    let step = BASE_STEP * train.speed_factor;
    train.lat += step + noise.lat_jitter;
    train.lon += step + noise.lon_drift;
}

/// Move a train one tick with freshly sampled noise
///
/// Returns the noise that was applied.
pub fn advance<R: Rng + ?Sized>(train: &mut Train, rng: &mut R) -> MovementNoise {
    let noise = MovementNoise::sample(rng);
    advance_with(train, noise);
    noise
}
