//! WebSocket transport for STOMP frames
//!
//! A [`Link`] is a pair of channels carrying whole frames. [`WsConnector`]
//! backs it with a real socket and a pump task. Tests can supply any other
//! [`Connector`] that hands out the same channel pair.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::frame::{Command, Frame, FrameError, Heartbeat};
use super::BrokerError;

/// Frames that may wait for the socket before sends start failing
pub const OUTBOUND_CAPACITY: usize = 256;

/// One open session's frame channels
///
/// `outbound` holds at most [`OUTBOUND_CAPACITY`] frames; dropping it closes
/// the underlying connection. `inbound` yields an `Err` (and then ends) when
/// the connection fails.
pub struct Link {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Result<Frame, BrokerError>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, BrokerError>;
}

pub struct WsConnector {
    url: String,
    heartbeat: Heartbeat,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, heartbeat: Heartbeat) -> Self {
        Self {
            url: url.into(),
            heartbeat,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, BrokerError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        debug!("WebSocket opened to {}", self.url);

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, outbound_rx, inbound_tx, self.heartbeat));

        Ok(Link { outbound, inbound })
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shuttle frames between the socket and the link channels until either side
/// goes away
///
/// Heart-beats start once CONNECTED has been seen and negotiated.
async fn pump(
    socket: Socket,
    mut outbound: mpsc::Receiver<Frame>,
    inbound: mpsc::UnboundedSender<Result<Frame, BrokerError>>,
    preferred: Heartbeat,
) {
    let (mut sink, mut stream) = socket.split();
    let mut send_ticker: Option<Interval> = None;
    let mut read_timeout: Option<Duration> = None;
    let mut last_read = Instant::now();

    loop {
        let deadline = read_timeout.map(|timeout| last_read + timeout);

        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return;
                };
                if let Err(e) = sink.send(Message::Text(frame.encode())).await {
                    let _ = inbound.send(Err(e.into()));
                    return;
                }
            }
            _ = tick(&mut send_ticker) => {
                if let Err(e) = sink.send(Message::Text("\n".to_string())).await {
                    let _ = inbound.send(Err(e.into()));
                    return;
                }
            }
            _ = expire(deadline) => {
                let waited = read_timeout.unwrap_or_default();
                let _ = inbound.send(Err(BrokerError::HeartbeatTimeout(waited)));
                return;
            }
            message = stream.next() => {
                last_read = Instant::now();
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            let _ = inbound.send(Err(FrameError::NotUtf8.into()));
                            return;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = inbound.send(Err(BrokerError::Closed));
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound.send(Err(e.into()));
                        return;
                    }
                };

                let decoded = match Frame::decode(&text) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => continue,
                    Err(e) => {
                        let _ = inbound.send(Err(e.into()));
                        return;
                    }
                };

                if decoded.command == Command::Connected {
                    let agreed = preferred.negotiate(decoded.get("heart-beat"));
                    debug!("Negotiated heart-beat {}", agreed);
                    send_ticker = heartbeat_ticker(agreed.outgoing_ms);
                    read_timeout = (agreed.incoming_ms > 0)
                        .then(|| Duration::from_millis(agreed.incoming_ms.saturating_mul(2)));
                }

                if inbound.send(Ok(decoded)).is_err() {
                    return;
                }
            }
        }
    }
}

fn heartbeat_ticker(period_ms: u64) -> Option<Interval> {
    if period_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(period_ms);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
