//! Prometheus metrics for the event pipeline.
//!
//! Components record through the small recorder structs below
//! ([`GeneratorMetrics`], [`ApplierMetrics`], [`HubMetrics`]). Recording is a
//! no-op until a recorder is installed, so tests never need to set one up.
//!
//! # Example
//!
//! ```rust,no_run
//! use flightfeed_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//!
//! // Serve this from a `/metrics` route
//! let body = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The exporter could not be configured
    #[error("Failed to build metrics exporter: {0}")]
    Build(#[from] BuildError),
}

/// Installed Prometheus recorder.
///
/// The binary installs one at startup and serves [`render`](Self::render)
/// over HTTP for scraping.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Describe every pipeline metric and install the Prometheus recorder
    /// globally.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be configured or
    /// another recorder is already installed.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )?
            .install_recorder()?;

        register_metrics();
        tracing::info!("Metrics recorder installed");
        Ok(Self { handle })
    }

    /// Current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

fn register_metrics() {
    // Generator
    describe_counter!(
        "flightfeed_events_generated_total",
        "Events synthesized by the generator, by event type"
    );
    describe_counter!(
        "flightfeed_events_published_total",
        "Events accepted by the event bus"
    );
    describe_counter!(
        "flightfeed_publish_failures_total",
        "Events dropped after publish retries were exhausted"
    );

    // Applier
    describe_counter!(
        "flightfeed_events_applied_total",
        "Events applied to flight state, by event type"
    );
    describe_counter!(
        "flightfeed_events_dropped_total",
        "Events consumed but not applied, by reason"
    );
    describe_histogram!(
        "flightfeed_apply_duration_seconds",
        Unit::Seconds,
        "Time from receipt to broadcast of one event"
    );

    // Hub
    describe_gauge!("flightfeed_subscribers", "Live push connections");
    describe_counter!(
        "flightfeed_notifications_delivered_total",
        "Notifications handed to a subscriber"
    );
    describe_counter!(
        "flightfeed_subscribers_pruned_total",
        "Subscribers removed after a failed send"
    );
}

/// Generator metrics recorder.
pub struct GeneratorMetrics;

impl GeneratorMetrics {
    /// Record a synthesized event.
    pub fn record_generated(event_type: &'static str) {
        counter!("flightfeed_events_generated_total", "event_type" => event_type).increment(1);
    }

    /// Record a successful publish.
    pub fn record_published() {
        counter!("flightfeed_events_published_total").increment(1);
    }

    /// Record an event lost to publish failure.
    pub fn record_publish_failure() {
        counter!("flightfeed_publish_failures_total").increment(1);
    }
}

/// Applier metrics recorder.
pub struct ApplierMetrics;

impl ApplierMetrics {
    /// Record an applied event and how long it took end to end.
    pub fn record_applied(event_type: &'static str, duration: Duration) {
        counter!("flightfeed_events_applied_total", "event_type" => event_type).increment(1);
        histogram!("flightfeed_apply_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an event that was consumed but not applied.
    pub fn record_dropped(reason: &'static str) {
        counter!("flightfeed_events_dropped_total", "reason" => reason).increment(1);
    }
}

/// Subscriber hub metrics recorder.
pub struct HubMetrics;

impl HubMetrics {
    /// Record the current number of subscribers.
    #[allow(clippy::cast_precision_loss)] // subscriber counts stay far below 2^52
    pub fn record_size(size: usize) {
        gauge!("flightfeed_subscribers").set(size as f64);
    }

    /// Record the outcome of one broadcast.
    pub fn record_broadcast(delivered: usize, pruned: usize) {
        counter!("flightfeed_notifications_delivered_total").increment(delivered as u64);
        if pruned > 0 {
            counter!("flightfeed_subscribers_pruned_total").increment(pruned as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        GeneratorMetrics::record_generated("DELAY");
        GeneratorMetrics::record_published();
        ApplierMetrics::record_applied("DELAY", Duration::from_millis(3));
        ApplierMetrics::record_dropped("duplicate");
        HubMetrics::record_size(3);
        HubMetrics::record_broadcast(3, 0);
    }

    #[test]
    fn installed_recorder_renders_pipeline_metrics() {
        // Another test binary thread may already own the global recorder.
        let Ok(recorder) = MetricsRecorder::install() else {
            return;
        };

        GeneratorMetrics::record_published();
        HubMetrics::record_broadcast(2, 1);

        let rendered = recorder.render();
        assert!(rendered.contains("flightfeed_events_published_total"));
        assert!(rendered.contains("flightfeed_subscribers_pruned_total"));
    }
}
