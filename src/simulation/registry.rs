//! The set of simulated trains
//!
//! Loaded once at startup from the backend, or from a built-in fallback set when
//! the backend is unreachable. After loading, only coordinates change.

use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::types::{Train, TrainId, TrainRecord};
use crate::config::SimConfig;
use crate::diagnostics::{Diagnostics, FailureKind};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid train list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Something that can produce the initial train list
#[async_trait]
pub trait TrainSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<TrainRecord>, FetchError>;
}

/// Fetches the train list with an HTTP GET
pub struct HttpTrainSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTrainSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TrainSource for HttpTrainSource {
    async fn fetch(&self) -> Result<Vec<TrainRecord>, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// All trains in the simulation, in source order
#[derive(Debug, Clone, Default)]
pub struct TrainRegistry {
    trains: Vec<Train>,
    index: HashMap<TrainId, usize>,
}

impl TrainRegistry {
    /// Build a registry from complete trains
    ///
    /// Duplicate ids are resolved last-write-wins: the later train replaces the
    /// earlier one in place.
    pub fn from_trains(trains: impl IntoIterator<Item = Train>) -> Self {
        let mut registry = Self::default();
        for train in trains {
            registry.insert(train);
        }
        registry
    }

    /// Fetch from the source, falling back to the built-in trains on failure,
    /// then fill in any missing fields from the configuration
    pub async fn load(
        source: &dyn TrainSource,
        config: &SimConfig,
        diagnostics: &Diagnostics,
    ) -> Self {
        let records = match source.fetch().await {
            Ok(records) => {
                info!("Fetched {} trains from backend", records.len());
                records
            }
            Err(e) => {
                diagnostics.report(FailureKind::Fetch, format!("Error fetching trains: {}", e));
                info!("Created default trains as fallback");
                fallback_trains(config)
                    .into_iter()
                    .map(TrainRecord::from)
                    .collect()
            }
        };
        Self::from_records(records, config)
    }

    /// Fill defaults for every record and collect them into a registry
    pub fn from_records(records: Vec<TrainRecord>, config: &SimConfig) -> Self {
        let mut registry = Self::default();
        for (position, record) in records.into_iter().enumerate() {
            match fill_defaults(record, position, config) {
                Some(train) => registry.insert(train),
                None => warn!("Dropping train record {} without an id", position),
            }
        }
        registry
    }

    fn insert(&mut self, train: Train) {
        match self.index.get(&train.id) {
            Some(&slot) => {
                warn!("Duplicate train id {}; keeping the later record", train.id);
                self.trains[slot] = train;
            }
            None => {
                self.index.insert(train.id.clone(), self.trains.len());
                self.trains.push(train);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.trains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
    }

    pub fn trains(&self) -> &[Train] {
        &self.trains
    }

    pub fn ids(&self) -> impl Iterator<Item = &TrainId> {
        self.trains.iter().map(|t| &t.id)
    }

    pub fn get(&self, id: &TrainId) -> Option<&Train> {
        self.index.get(id).map(|&slot| &self.trains[slot])
    }

    pub fn get_mut(&mut self, id: &TrainId) -> Option<&mut Train> {
        self.index.get(id).map(|&slot| &mut self.trains[slot])
    }
}

/// Turn a partial record into a full train, or `None` when it has no id
fn fill_defaults(record: TrainRecord, position: usize, config: &SimConfig) -> Option<Train> {
    let id = record.id?;
    let palette = &config.trains.colors;
    let color = record.color.unwrap_or_else(|| {
        palette
            .get(position % palette.len().max(1))
            .cloned()
            .unwrap_or_default()
    });
    let speed_factor = record
        .speed_factor
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(config.trains.default_speed);

    Some(Train {
        name: record.name.unwrap_or_else(|| format!("Train {}", id)),
        lat: record.lat.unwrap_or(config.initial_location.lat),
        lon: record.lon.unwrap_or(config.initial_location.lon),
        color,
        speed_factor,
        departure_place: record.departure_place,
        destination_place: record.destination_place,
        id,
    })
}

/// The three trains used when the backend cannot be reached
pub fn fallback_trains(config: &SimConfig) -> Vec<Train> {
    let speeds = &config.trains;
    vec![
        Train::new(
            1,
            "Express Train",
            36.8065,
            10.1815,
            "#FF5722",
            speeds.fast_speed,
            "Tunis",
            "Sousse",
        ),
        Train::new(
            2,
            "Local Train",
            36.8165,
            10.1715,
            "#4CAF50",
            speeds.default_speed,
            "Bizerte",
            "Tunis",
        ),
        Train::new(
            3,
            "Cargo Train",
            36.7965,
            10.1915,
            "#2196F3",
            speeds.slow_speed,
            "Sfax",
            "Tunis",
        ),
    ]
}
