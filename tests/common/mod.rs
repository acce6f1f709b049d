//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use train_sim::broker::{
    BrokerClient, BrokerError, BrokerSettings, Command, Connector, Frame, Heartbeat, Link,
    ReconnectPolicy, OUTBOUND_CAPACITY,
};
use train_sim::diagnostics::Diagnostics;
use train_sim::simulation::{FetchError, TrainRecord, TrainSource};

/// What the fake broker does with the next connection attempt
#[derive(Debug, Clone, Copy)]
pub enum Attempt {
    Accept,
    Refuse,
}

/// Broker side of an accepted fake connection
pub struct Peer {
    pub from_client: mpsc::Receiver<Frame>,
    pub to_client: mpsc::UnboundedSender<Result<Frame, BrokerError>>,
}

impl Peer {
    /// All frames the client has queued so far
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn deliver(&self, subscription: &str, body: &str) {
        let frame = Frame::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", "/topic/test")
            .with_body(body);
        self.to_client.send(Ok(frame)).unwrap();
    }

    pub fn fail(&self, error: BrokerError) {
        self.to_client.send(Err(error)).unwrap();
    }
}

/// In-memory connector following a script of accept/refuse decisions
///
/// Once the script is exhausted every further attempt is refused.
pub struct FakeConnector {
    script: Mutex<VecDeque<Attempt>>,
    calls: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl FakeConnector {
    pub fn new(script: &[Attempt]) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peers_rx)
    }

    /// Times at which connect was attempted
    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Link, BrokerError> {
        self.calls.lock().unwrap().push(Instant::now());
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Refuse);

        match attempt {
            Attempt::Refuse => Err(BrokerError::Handshake("connection refused".to_string())),
            Attempt::Accept => {
                let (outbound, from_client) = mpsc::channel(OUTBOUND_CAPACITY);
                let (to_client, inbound) = mpsc::unbounded_channel();
                to_client
                    .send(Ok(Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0")))
                    .unwrap();
                let _ = self.peers.send(Peer {
                    from_client,
                    to_client,
                });
                Ok(Link { outbound, inbound })
            }
        }
    }
}

pub fn test_settings(max_attempts: u32) -> BrokerSettings {
    BrokerSettings {
        host: "localhost".to_string(),
        heartbeat: Heartbeat::new(0, 0),
        policy: ReconnectPolicy::new(Duration::from_millis(5000), max_attempts),
        handshake_timeout: Duration::from_secs(10),
    }
}

pub fn fake_client(
    script: &[Attempt],
    max_attempts: u32,
) -> (
    BrokerClient,
    Arc<FakeConnector>,
    mpsc::UnboundedReceiver<Peer>,
    Arc<Diagnostics>,
) {
    let (connector, peers) = FakeConnector::new(script);
    let diagnostics = Arc::new(Diagnostics::new());
    let client = BrokerClient::new(
        test_settings(max_attempts),
        connector.clone(),
        diagnostics.clone(),
    );
    (client, connector, peers, diagnostics)
}

/// Train source returning canned records, or a backend error
pub struct FakeSource {
    records: Option<Vec<TrainRecord>>,
    fetches: AtomicUsize,
}

impl FakeSource {
    pub fn ok(records: Vec<TrainRecord>) -> Self {
        Self {
            records: Some(records),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            records: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// How many times the train list was requested
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrainSource for FakeSource {
    async fn fetch(&self) -> Result<Vec<TrainRecord>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.records {
            Some(records) => Ok(records.clone()),
            None => Err(FetchError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            )),
        }
    }
}
