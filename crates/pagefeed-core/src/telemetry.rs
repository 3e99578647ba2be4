//! Usage telemetry seam.
//!
//! The channel reports how many clients are connected and which paths are
//! being watched. Paths only ever leave this module as SHA-256 digests.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Reported after replying to a page-data request.
pub const PAGE_DATA_UPDATE: &str = "WEBSOCKET_PAGE_DATA_UPDATE";

/// Reported after broadcasting a page query result.
pub const EMIT_PAGE_DATA_UPDATE: &str = "WEBSOCKET_EMIT_PAGE_DATA_UPDATE";

/// Reported after broadcasting a static query result.
pub const EMIT_STATIC_PAGE_DATA_UPDATE: &str = "WEBSOCKET_EMIT_STATIC_PAGE_DATA_UPDATE";

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Options attached to a tracked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackOptions {
    /// Collapse bursts of this event into one.
    pub debounce: bool,
}

impl TrackOptions {
    /// Options for a debounced event.
    #[must_use]
    pub fn debounced() -> Self {
        Self { debounce: true }
    }
}

/// Fire-and-forget event sink.
///
/// Implementations must return quickly and never panic; the channel calls
/// `track` on its reply path.
pub trait TelemetrySink: Send + Sync {
    /// Record an event.
    fn track(&self, event: &str, payload: Value, options: TrackOptions);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track(&self, _event: &str, _payload: Value, _options: TrackOptions) {}
}

/// A sink that keeps every event, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TrackedEvent>>,
}

/// An event kept by [`RecordingTelemetry`].
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEvent {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Value,
    /// Event options.
    pub options: TrackOptions,
}

#[cfg(test)]
impl RecordingTelemetry {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
impl TelemetrySink for RecordingTelemetry {
    fn track(&self, event: &str, payload: Value, options: TrackOptions) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TrackedEvent {
                event: event.to_string(),
                payload,
                options,
            });
    }
}

/// Rate limiter for debounced events.
///
/// Each event name passes at most once per window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl Debouncer {
    /// Create a debouncer with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether an event should go through now.
    pub fn should_emit(&self, event: &str, options: TrackOptions) -> bool {
        self.should_emit_at(event, options, Instant::now())
    }

    fn should_emit_at(&self, event: &str, options: TrackOptions, now: Instant) -> bool {
        if !options.debounce {
            return true;
        }

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.get(event) {
            Some(at) if now.saturating_duration_since(*at) < self.window => false,
            _ => {
                last.insert(event.to_string(), now);
                true
            }
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

/// One-way digest of a page path (lowercase hex SHA-256).
#[must_use]
pub fn hash_path(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    format!("{:x}", digest)
}

/// Payload describing current usage of the channel.
#[must_use]
pub fn site_measurements(clients_count: usize, active_paths: &[String]) -> Value {
    let mut paths: Vec<String> = active_paths.iter().map(|p| hash_path(p)).collect();
    paths.sort();
    json!({
        "siteMeasurements": {
            "clientsCount": clients_count,
            "paths": paths,
        }
    })
}
