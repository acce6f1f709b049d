//! Train Position Simulator
//!
//! Moves a fleet of simulated trains and publishes their positions to a STOMP
//! broker over WebSocket.

pub mod broker;
pub mod config;
pub mod diagnostics;
pub mod simulation;
pub mod runner;
