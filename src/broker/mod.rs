//! STOMP-over-WebSocket broker client
//!
//! The client owns one logical broker session at a time, replays its
//! subscriptions on every reconnect, and retries dropped connections with
//! linear backoff until its retry budget runs out.

mod backoff;
mod client;
mod frame;
mod transport;

use std::time::Duration;
use thiserror::Error;

pub use backoff::ReconnectPolicy;
pub use client::{
    json_logger, BrokerClient, BrokerSettings, ConnectionState, MessageHandler, PublishOutcome,
};
pub use frame::{Command, Frame, FrameError, Heartbeat};
pub use transport::{Connector, Link, WsConnector, OUTBOUND_CAPACITY};

/// Why a broker session failed or could not be established
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("broker reported error: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("no heart-beat from broker within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("failed to reconnect after {0} attempts")]
    RetriesExhausted(u32),
}
