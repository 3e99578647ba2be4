//! Telemetry sink backed by metrics and logs.

use crate::config::TelemetryConfig;
use crate::metrics;
use pagefeed_core::{Debouncer, TelemetrySink, TrackOptions};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Records debounced usage events as metrics and debug logs.
#[derive(Debug)]
pub struct MetricsTelemetry {
    enabled: bool,
    debouncer: Debouncer,
}

impl MetricsTelemetry {
    /// Create a sink from configuration.
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms)),
        }
    }
}

impl TelemetrySink for MetricsTelemetry {
    fn track(&self, event: &str, payload: Value, options: TrackOptions) {
        if !self.enabled || !self.debouncer.should_emit(event, options) {
            return;
        }

        metrics::record_telemetry_event(event);
        if let Some(paths) = payload["siteMeasurements"]["paths"].as_array() {
            metrics::set_active_paths(paths.len());
        }
        debug!(event = %event, payload = %payload, "Telemetry event");
    }
}
