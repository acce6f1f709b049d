//! Core types for the train simulation
//!
//! These are the shapes that travel over the wire: what the backend hands us,
//! what we keep in memory, and what we publish back to the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for a train
///
/// The backend is free to use numeric or textual ids, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrainId {
    Number(i64),
    Text(String),
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainId::Number(n) => write!(f, "{}", n),
            TrainId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TrainId {
    fn from(value: i64) -> Self {
        TrainId::Number(value)
    }
}

impl From<&str> for TrainId {
    fn from(value: &str) -> Self {
        TrainId::Text(value.to_string())
    }
}

/// A latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A simulated train
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Display color, fixed at creation
    pub color: String,
    /// Scales both the per-tick step and the tick frequency; always > 0
    pub speed_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_place: Option<String>,
}

impl Train {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        name: &str,
        lat: f64,
        lon: f64,
        color: &str,
        speed_factor: f64,
        departure_place: &str,
        destination_place: &str,
    ) -> Self {
        Self {
            id: TrainId::Number(id),
            name: name.to_string(),
            lat,
            lon,
            color: color.to_string(),
            speed_factor,
            departure_place: Some(departure_place.to_string()),
            destination_place: Some(destination_place.to_string()),
        }
    }
}

/// A train as returned by the backend, where any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRecord {
    pub id: Option<TrainId>,
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub color: Option<String>,
    pub speed_factor: Option<f64>,
    pub departure_place: Option<String>,
    pub destination_place: Option<String>,
}

impl From<Train> for TrainRecord {
    fn from(train: Train) -> Self {
        Self {
            id: Some(train.id),
            name: Some(train.name),
            lat: Some(train.lat),
            lon: Some(train.lon),
            color: Some(train.color),
            speed_factor: Some(train.speed_factor),
            departure_place: train.departure_place,
            destination_place: train.destination_place,
        }
    }
}

/// The single-train payload published on every movement tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub id: TrainId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_place: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LocationUpdate {
    pub fn from_train(train: &Train, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: train.id.clone(),
            name: train.name.clone(),
            lat: train.lat,
            lon: train.lon,
            color: train.color.clone(),
            departure_place: train.departure_place.clone(),
            destination_place: train.destination_place.clone(),
            timestamp,
        }
    }
}
