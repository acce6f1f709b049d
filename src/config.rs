//! Simulator configuration
//!
//! Every field has a default matching the stock deployment, so an empty (or
//! missing) config file yields a working setup against a local broker.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::simulation::Coordinates;

pub const DEFAULT_BROKER_URL: &str = "ws://localhost:5001/ws/websocket";
pub const DEFAULT_TRAINS_URL: &str = "http://localhost:5001/train/getAllTrains";

/// Problems found while validating a loaded configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid broker url {url:?}: {reason}")]
    BrokerUrl { url: String, reason: String },

    #[error("{field} must be a positive, finite number (got {value})")]
    Speed { field: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("trains.colors must contain at least one color")]
    EmptyPalette,
}

/// Per-train presentation and speed classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainsConfig {
    pub colors: Vec<String>,
    pub default_speed: f64,
    pub fast_speed: f64,
    pub slow_speed: f64,
}

impl Default for TrainsConfig {
    fn default() -> Self {
        Self {
            colors: [
                "#FF5722", "#4CAF50", "#2196F3", "#9C27B0", "#FFC107", "#F44336", "#3F51B5",
                "#009688",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            default_speed: 1.0,
            fast_speed: 1.5,
            slow_speed: 0.7,
        }
    }
}

/// Broker topics we listen on and destinations we publish to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopicsConfig {
    pub location_topic: String,
    pub trains_topic: String,
    pub location_destination: String,
    pub bulk_destination: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            location_topic: "/topic/location".to_string(),
            trains_topic: "/topic/trains".to_string(),
            location_destination: "/app/locate".to_string(),
            bulk_destination: "/app/locate-json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub broker_url: String,
    pub trains_url: String,
    pub fetch_timeout_ms: u64,
    /// Fallback position for trains the backend sends without coordinates
    pub initial_location: Coordinates,
    /// Base movement period; each train ticks every `update_interval_ms / speedFactor`
    pub update_interval_ms: u64,
    pub bulk_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub heartbeat_incoming_ms: u64,
    pub heartbeat_outgoing_ms: u64,
    pub handshake_timeout_ms: u64,
    pub trains: TrainsConfig,
    pub topics: TopicsConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            trains_url: DEFAULT_TRAINS_URL.to_string(),
            fetch_timeout_ms: 5000,
            initial_location: Coordinates::new(36.8065, 10.1815),
            update_interval_ms: 1000,
            bulk_interval_ms: 2000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 5000,
            heartbeat_incoming_ms: 4000,
            heartbeat_outgoing_ms: 4000,
            handshake_timeout_ms: 10_000,
            trains: TrainsConfig::default(),
            topics: TopicsConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load the configuration from a TOML file, or the defaults when no path is given
    ///
    /// Not validated; call [`SimConfig::validate`] once overrides are applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid TOML")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.broker_url).map_err(|e| ConfigError::BrokerUrl {
            url: self.broker_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::BrokerUrl {
                url: self.broker_url.clone(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        for (field, value) in [
            ("trains.default_speed", self.trains.default_speed),
            ("trains.fast_speed", self.trains.fast_speed),
            ("trains.slow_speed", self.trains.slow_speed),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Speed { field, value });
            }
        }

        for (field, value) in [
            ("update_interval_ms", self.update_interval_ms),
            ("bulk_interval_ms", self.bulk_interval_ms),
            ("reconnect_base_delay_ms", self.reconnect_base_delay_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(field));
            }
        }

        if self.trains.colors.is_empty() {
            return Err(ConfigError::EmptyPalette);
        }

        Ok(())
    }

    /// Host header value for the STOMP CONNECT frame
    pub fn broker_host(&self) -> String {
        Url::parse(&self.broker_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "/".to_string())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn bulk_interval(&self) -> Duration {
        Duration::from_millis(self.bulk_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
