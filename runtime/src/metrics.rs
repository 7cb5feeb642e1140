//! Prometheus metrics for the event bus.
//!
//! The bus records counters and histograms through the [`metrics`] facade on
//! every publish, consume, handler failure and dead-letter route. Nothing is
//! exported unless the application installs a recorder; [`MetricsExporter`]
//! installs the Prometheus one.
//!
//! # Example
//!
//! ```rust,no_run
//! use freight_events_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Serve this from the service's /metrics route
//! let body = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders the scrape body.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the bus metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the histogram buckets are rejected and
    /// [`MetricsError::Install`] if the recorder cannot be installed.
    ///
    /// A recorder that is already installed (e.g. by another test) is not an
    /// error; [`render`](Self::render) then returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_metrics() {
    describe_counter!(
        "event_bus_messages_published_total",
        "Events acknowledged by the broker"
    );
    describe_counter!(
        "event_bus_publish_errors_total",
        "Publish attempts rejected by validation or the broker"
    );
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Time from publish call to broker acknowledgement"
    );
    describe_counter!(
        "event_bus_messages_consumed_total",
        "Messages whose handler completed successfully"
    );
    describe_counter!(
        "event_bus_messages_skipped_total",
        "Messages committed without a registered handler"
    );
    describe_counter!(
        "event_bus_handler_errors_total",
        "Handler invocations that failed"
    );
    describe_histogram!(
        "event_bus_handler_duration_seconds",
        "Time spent inside handlers"
    );
    describe_counter!(
        "event_bus_consumer_reconnects_total",
        "Pulling loop reconnects after broker failures"
    );
    describe_counter!(
        "event_bus_dlq_routed_total",
        "Messages forwarded to a dead-letter topic"
    );
    describe_counter!(
        "event_bus_dlq_lost_total",
        "Failed messages that could not be dead-lettered"
    );
}

/// Publisher metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record an acknowledged publish.
    pub fn record_publish(topic: &str, event_type: &str, duration: Duration) {
        counter!(
            "event_bus_messages_published_total",
            "topic" => topic.to_string(),
            "event_type" => event_type.to_string()
        )
        .increment(1);
        histogram!("event_bus_publish_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a failed publish. `reason` is a short stable tag.
    pub fn record_error(event_type: &str, reason: &'static str) {
        counter!(
            "event_bus_publish_errors_total",
            "event_type" => event_type.to_string(),
            "reason" => reason
        )
        .increment(1);
    }
}

/// Consumer group metrics recorder.
pub struct ConsumeMetrics;

impl ConsumeMetrics {
    /// Record a successfully handled message.
    pub fn record_consumed(group: &str, event_type: &str, duration: Duration) {
        counter!(
            "event_bus_messages_consumed_total",
            "consumer_group" => group.to_string(),
            "event_type" => event_type.to_string()
        )
        .increment(1);
        histogram!("event_bus_handler_duration_seconds", "consumer_group" => group.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a message skipped for lack of a handler.
    pub fn record_skipped(group: &str, event_type: &str) {
        counter!(
            "event_bus_messages_skipped_total",
            "consumer_group" => group.to_string(),
            "event_type" => event_type.to_string()
        )
        .increment(1);
    }

    /// Record a failed message. `kind` is the dead-letter failure kind.
    pub fn record_failure(group: &str, kind: &'static str) {
        counter!(
            "event_bus_handler_errors_total",
            "consumer_group" => group.to_string(),
            "failure_kind" => kind
        )
        .increment(1);
    }

    /// Record a pulling loop reconnect.
    pub fn record_reconnect(group: &str) {
        counter!("event_bus_consumer_reconnects_total", "consumer_group" => group.to_string())
            .increment(1);
    }
}

/// Dead-letter metrics recorder.
pub struct DeadLetterMetrics;

impl DeadLetterMetrics {
    /// Record a message forwarded to its dead-letter topic.
    pub fn record_routed(source_topic: &str) {
        counter!("event_bus_dlq_routed_total", "topic" => source_topic.to_string()).increment(1);
    }

    /// Record a message that could not be dead-lettered.
    pub fn record_lost(source_topic: &str) {
        counter!("event_bus_dlq_lost_total", "topic" => source_topic.to_string()).increment(1);
    }
}
