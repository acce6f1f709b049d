//! Broker session management: connect, subscribe, publish, reconnect

use log::{debug, error, info};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::backoff::ReconnectPolicy;
use super::frame::{Command, Frame, Heartbeat};
use super::transport::{Connector, Link};
use super::BrokerError;
use crate::config::SimConfig;
use crate::diagnostics::{Diagnostics, FailureKind};

/// Receives the raw body of every MESSAGE on a subscription
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

type Inbound = mpsc::UnboundedReceiver<Result<Frame, BrokerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The retry budget is spent; no further connection attempt will be made
    Exhausted,
}

/// What happened to a single publish call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    /// Not connected, nothing was sent
    Skipped,
    /// Serialization or queueing failed; already reported to diagnostics
    Failed,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Value of the CONNECT frame's `host` header
    pub host: String,
    pub heartbeat: Heartbeat,
    pub policy: ReconnectPolicy,
    pub handshake_timeout: Duration,
}

impl BrokerSettings {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            host: config.broker_host(),
            heartbeat: Heartbeat::new(config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms),
            policy: ReconnectPolicy::new(
                config.reconnect_base_delay(),
                config.max_reconnect_attempts,
            ),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

#[derive(Clone)]
struct Subscription {
    id: String,
    topic: String,
    handler: MessageHandler,
}

struct Inner {
    settings: BrokerSettings,
    connector: Arc<dyn Connector>,
    diagnostics: Arc<Diagnostics>,
    state: watch::Sender<ConnectionState>,
    /// Sender for the live session; `None` while disconnected
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    reconnect_attempts: AtomicU32,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the broker connection
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    pub fn new(
        settings: BrokerSettings,
        connector: Arc<dyn Connector>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                diagnostics,
                state,
                outbound: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                reconnect_attempts: AtomicU32::new(0),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Spawn the connection driver; calling it again while it runs is a no-op
    pub fn start(&self) {
        let mut driver = lock(&self.inner.driver);
        if driver.is_none() {
            *driver = Some(tokio::spawn(drive(self.inner.clone())));
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Consecutive failures since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Wait until a session is up, or fail if the retry budget runs out first
    pub async fn wait_connected(&self) -> Result<(), BrokerError> {
        let mut state = self.inner.state.subscribe();
        let reached = *state
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Exhausted))
            .await
            .map_err(|_| BrokerError::Closed)?;
        match reached {
            ConnectionState::Exhausted => Err(BrokerError::RetriesExhausted(
                self.inner.settings.policy.max_attempts,
            )),
            _ => Ok(()),
        }
    }

    /// Register a handler for a topic
    ///
    /// The subscription is sent now if connected and replayed on every
    /// reconnect.
    pub fn subscribe(&self, topic: &str, handler: MessageHandler) {
        let mut subscriptions = lock(&self.inner.subscriptions);
        let subscription = Subscription {
            id: format!("sub-{}", subscriptions.len()),
            topic: topic.to_string(),
            handler,
        };
        if let Some(outbound) = lock(&self.inner.outbound).as_ref() {
            if let Err(e) = outbound.try_send(Frame::subscribe(&subscription.id, topic)) {
                // Replayed on the next connect
                debug!("SUBSCRIBE to {} not sent: {}", topic, e);
            }
        }
        info!("Subscribed to {}", topic);
        subscriptions.push(subscription);
    }

    /// Serialize `payload` as JSON and send it to `destination`
    ///
    /// Fire-and-forget: failures are reported to diagnostics, never returned.
    /// A full outbound queue counts as a failure; the frame is dropped.
    pub fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> PublishOutcome {
        if !self.is_connected() {
            return PublishOutcome::Skipped;
        }

        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                self.inner.diagnostics.report(
                    FailureKind::Publish,
                    format!("Error serializing payload for {}: {}", destination, e),
                );
                return PublishOutcome::Failed;
            }
        };

        let outbound = lock(&self.inner.outbound);
        let Some(sender) = outbound.as_ref() else {
            return PublishOutcome::Skipped;
        };
        let reason = match sender.try_send(Frame::send(destination, body)) {
            Ok(()) => return PublishOutcome::Sent,
            Err(TrySendError::Full(_)) => "outbound queue is full",
            Err(TrySendError::Closed(_)) => "connection is closing",
        };
        self.inner.diagnostics.report(
            FailureKind::Publish,
            format!("Error sending to {}: {}", destination, reason),
        );
        PublishOutcome::Failed
    }

    /// Stop the driver and close the session
    pub fn shutdown(&self) {
        if let Some(driver) = lock(&self.inner.driver).take() {
            driver.abort();
        }
        if let Some(outbound) = lock(&self.inner.outbound).take() {
            if let Err(e) = outbound.try_send(Frame::disconnect()) {
                debug!("DISCONNECT not sent: {}", e);
            }
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("Broker client shut down");
    }
}

/// Build a handler that decodes JSON bodies and logs them under `label`
pub fn json_logger(label: &'static str, diagnostics: Arc<Diagnostics>) -> MessageHandler {
    Arc::new(move |body: &str| {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => info!("{}: {}", label, value),
            Err(e) => diagnostics.report(
                FailureKind::Decode,
                format!("Error parsing {} message: {}", label, e),
            ),
        }
    })
}

/// Connection loop: connect, run the session, back off, repeat until the
/// retry budget is spent
async fn drive(inner: Arc<Inner>) {
    loop {
        inner.state.send_replace(ConnectionState::Connecting);

        let failure = match inner.establish().await {
            Ok(inbound) => inner.run_session(inbound).await,
            Err(e) => e,
        };

        lock(&inner.outbound).take();
        inner.state.send_replace(ConnectionState::Disconnected);
        inner.diagnostics.report(FailureKind::Connection, &failure);

        let policy = inner.settings.policy;
        let attempt = inner.reconnect_attempts.load(Ordering::SeqCst) + 1;
        match policy.delay_for(attempt) {
            Some(delay) => {
                inner.reconnect_attempts.store(attempt, Ordering::SeqCst);
                info!(
                    "Reconnect attempt {}/{} in {:?}...",
                    attempt, policy.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    "Failed to reconnect after {} attempts.",
                    policy.max_attempts
                );
                inner.state.send_replace(ConnectionState::Exhausted);
                return;
            }
        }
    }
}

impl Inner {
    /// Open a link, complete the STOMP handshake and install the session
    async fn establish(&self) -> Result<Inbound, BrokerError> {
        let Link {
            outbound,
            mut inbound,
        } = self.connector.connect().await?;

        outbound
            .try_send(Frame::connect(&self.settings.host, self.settings.heartbeat))
            .map_err(|_| BrokerError::Closed)?;

        let reply = tokio::time::timeout(self.settings.handshake_timeout, inbound.recv())
            .await
            .map_err(|_| BrokerError::Handshake("timed out waiting for CONNECTED".to_string()))?;
        match reply {
            Some(Ok(frame)) if frame.command == Command::Connected => {}
            Some(Ok(frame)) if frame.command == Command::Error => {
                return Err(BrokerError::Protocol(error_message(&frame)));
            }
            Some(Ok(frame)) => {
                return Err(BrokerError::Handshake(format!(
                    "unexpected {} frame",
                    frame.command
                )));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(BrokerError::Closed),
        }

        // Subscriptions stay locked until the session is visible, so a
        // concurrent subscribe() is either replayed here or sent directly.
        let subscriptions = lock(&self.subscriptions);
        for subscription in subscriptions.iter() {
            outbound
                .try_send(Frame::subscribe(&subscription.id, &subscription.topic))
                .map_err(|_| BrokerError::Closed)?;
        }
        *lock(&self.outbound) = Some(outbound);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
        drop(subscriptions);

        info!("Connected to WebSocket server");
        Ok(inbound)
    }

    /// Dispatch inbound frames until the session fails; returns the cause
    async fn run_session(&self, mut inbound: Inbound) -> BrokerError {
        while let Some(item) = inbound.recv().await {
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => return e,
            };
            match frame.command {
                Command::Message => self.dispatch(&frame),
                Command::Error => return BrokerError::Protocol(error_message(&frame)),
                other => debug!("Ignoring {} frame", other),
            }
        }
        BrokerError::Closed
    }

    fn dispatch(&self, frame: &Frame) {
        let handler = {
            let subscriptions = lock(&self.subscriptions);
            frame.get("subscription").and_then(|id| {
                subscriptions
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.handler.clone())
            })
        };
        match handler {
            Some(handler) => handler(&frame.body),
            None => debug!(
                "Dropping message for unknown subscription {:?}",
                frame.get("subscription")
            ),
        }
    }
}

fn error_message(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
