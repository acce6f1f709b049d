//! Single sink for failures that are handled locally and never propagated
//!
//! Fetch, decode, publish and connection failures are all recovered where they
//! happen. They still pass through here so they are logged in one format and
//! counted, which keeps the "swallowed" paths observable from tests.

use log::{error, warn};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

/// Category of a locally recovered failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend train list could not be fetched or parsed
    Fetch,
    /// Inbound broker message body was not valid JSON
    Decode,
    /// An outbound update could not be serialized or queued
    Publish,
    /// Broker session ended (protocol error, transport error, timeout)
    Connection,
}

impl FailureKind {
    fn label(self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Decode => "decode",
            FailureKind::Publish => "publish",
            FailureKind::Connection => "connection",
        }
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    fetch: AtomicU64,
    decode: AtomicU64,
    publish: AtomicU64,
    connection: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, kind: FailureKind, detail: impl Display) {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
        match kind {
            FailureKind::Fetch | FailureKind::Decode => {
                warn!("[{}] {}", kind.label(), detail)
            }
            FailureKind::Publish | FailureKind::Connection => {
                error!("[{}] {}", kind.label(), detail)
            }
        }
    }

    /// Number of failures of the given kind reported so far
    pub fn count(&self, kind: FailureKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    fn counter(&self, kind: FailureKind) -> &AtomicU64 {
        match kind {
            FailureKind::Fetch => &self.fetch,
            FailureKind::Decode => &self.decode,
            FailureKind::Publish => &self.publish,
            FailureKind::Connection => &self.connection,
        }
    }
}
