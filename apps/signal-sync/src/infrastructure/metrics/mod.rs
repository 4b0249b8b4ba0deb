//! Prometheus Metrics Module
//!
//! Exposes sync client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Live stream frames received by event kind, parse failures
//! - **Connection**: Connected gauge, reconnect attempts, transport errors
//! - **State**: Records currently held
//! - **Snapshot**: REST fetch outcomes and latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "signal_sync_messages_received_total",
        "Total live stream messages received by event kind"
    );
    describe_counter!(
        "signal_sync_parse_errors_total",
        "Total live stream frames discarded as malformed"
    );
    describe_counter!(
        "signal_sync_pings_sent_total",
        "Total heartbeat pings sent"
    );

    // Connection
    describe_gauge!(
        "signal_sync_connected",
        "Whether the live stream is currently open (1) or not (0)"
    );
    describe_counter!(
        "signal_sync_connection_errors_total",
        "Total live stream transport errors by type"
    );
    describe_counter!(
        "signal_sync_reconnects_total",
        "Total scheduled reconnection attempts"
    );

    // State
    describe_gauge!(
        "signal_sync_records",
        "Number of records in the synchronized state"
    );

    // Snapshot
    describe_counter!(
        "signal_sync_snapshot_fetches_total",
        "Total history fetches by outcome"
    );
    describe_histogram!(
        "signal_sync_snapshot_fetch_seconds",
        "History fetch latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome labels for history fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Records retrieved.
    Success,
    /// Fetch failed.
    Failure,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a live stream message by event kind.
pub fn record_message_received(kind: &'static str) {
    counter!("signal_sync_messages_received_total", "event" => kind).increment(1);
}

/// Record a discarded malformed frame.
pub fn record_parse_error() {
    counter!("signal_sync_parse_errors_total").increment(1);
}

/// Record a heartbeat ping.
pub fn record_ping_sent() {
    counter!("signal_sync_pings_sent_total").increment(1);
}

/// Update the connected gauge.
pub fn set_connected(connected: bool) {
    gauge!("signal_sync_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a live stream transport error.
pub fn record_connection_error(error_type: &'static str) {
    counter!("signal_sync_connection_errors_total", "error_type" => error_type).increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("signal_sync_reconnects_total").increment(1);
}

/// Update the record count gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_records(count: usize) {
    gauge!("signal_sync_records").set(count as f64);
}

/// Record a history fetch and its latency.
pub fn record_snapshot_fetch(outcome: FetchOutcome, duration: Duration) {
    counter!("signal_sync_snapshot_fetches_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("signal_sync_snapshot_fetch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_outcome_as_str() {
        assert_eq!(FetchOutcome::Success.as_str(), "success");
        assert_eq!(FetchOutcome::Failure.as_str(), "failure");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received("signal");
        record_parse_error();
        set_connected(true);
        set_records(3);
        record_snapshot_fetch(FetchOutcome::Success, Duration::from_millis(5));
    }
}
