//! Cache hit/miss events
//!
//! Backends report every fetch outcome to a [`CacheEventRecorder`]. Recording
//! is fire-and-forget: a recorder that cannot deliver an event drops it
//! rather than failing the fetch.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Where a cache event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheSource {
    /// Local filesystem cache
    Local,
    /// Remote HTTP cache
    Remote,
}

/// Outcome of a cache fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheEventKind {
    /// Artifact found and restored
    Hit,
    /// Artifact not present
    Miss,
}

impl CacheEventKind {
    /// Event kind for a fetch outcome
    #[must_use]
    pub fn from_hit(hit: bool) -> Self {
        if hit { Self::Hit } else { Self::Miss }
    }
}

/// A single fetch outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEvent {
    /// Backend that served the fetch
    pub source: CacheSource,
    /// Hit or miss
    pub event: CacheEventKind,
    /// Artifact hash
    pub hash: String,
    /// Recorded task duration (0 on miss)
    pub duration: u64,
}

/// Sink for cache events
pub trait CacheEventRecorder: Send + Sync {
    /// Record an event; must not block or fail
    fn log_event(&self, event: CacheEvent);
}

/// Emits events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl CacheEventRecorder for TracingRecorder {
    fn log_event(&self, event: CacheEvent) {
        tracing::info!(
            target: "cuenv::cache::events",
            source = ?event.source,
            event = ?event.event,
            hash = %event.hash,
            duration = event.duration,
            "cache event"
        );
    }
}

/// Forwards events to an async consumer (e.g. an analytics uploader)
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    sender: UnboundedSender<CacheEvent>,
}

impl ChannelRecorder {
    /// Wrap an unbounded sender
    #[must_use]
    pub fn new(sender: UnboundedSender<CacheEvent>) -> Self {
        Self { sender }
    }
}

impl CacheEventRecorder for ChannelRecorder {
    fn log_event(&self, event: CacheEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("cache event receiver dropped; discarding event");
        }
    }
}

/// Discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl CacheEventRecorder for NoopRecorder {
    fn log_event(&self, _event: CacheEvent) {}
}
