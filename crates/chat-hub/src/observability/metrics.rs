//! Prometheus metrics for the chat hub.
//!
//! All metrics follow Prometheus naming conventions:
//! - `chat_hub_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! No metric carries a room or user label. Labels are limited to small
//! closed sets:
//! - `reason`: eviction and drop reasons (< 5 values)
//! - `status`: `success` / `error` / `timeout`
//! - `kind`: `message` / `relay`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Processing includes a database round trip
        .set_buckets_for_metric(
            Matcher::Prefix("chat_hub_processing".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set processing latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("chat_hub_bus_publish".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set bus publish buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry gauges
// ============================================================================

/// Metric: `chat_hub_connections_active`
///
/// Moved by deltas, never set.
pub fn record_connection_opened() {
    gauge!("chat_hub_connections_active").increment(1.0);
}

/// Metric: `chat_hub_connections_active`
pub fn record_connection_closed() {
    gauge!("chat_hub_connections_active").decrement(1.0);
}

/// Metric: `chat_hub_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("chat_hub_rooms_active").set(count as f64);
}

/// Metric: `chat_hub_fanout_enabled` (1 when the bus bridge is running).
pub fn set_fanout_enabled(enabled: bool) {
    gauge!("chat_hub_fanout_enabled").set(if enabled { 1.0 } else { 0.0 });
}

// ============================================================================
// Dispatch counters
// ============================================================================

/// Metric: `chat_hub_events_dispatched_total`
///
/// Labels: `origin` (`local`, `bus`)
pub fn record_event_dispatched(from_bus: bool) {
    let origin = if from_bus { "bus" } else { "local" };
    counter!("chat_hub_events_dispatched_total", "origin" => origin).increment(1);
}

/// Metric: `chat_hub_deliveries_total`
pub fn record_deliveries(count: usize) {
    counter!("chat_hub_deliveries_total").increment(count as u64);
}

/// Metric: `chat_hub_evictions_total`
///
/// Labels: `reason` (`queue_full`, `closed`)
pub fn record_eviction(reason: &'static str) {
    counter!("chat_hub_evictions_total", "reason" => reason).increment(1);
}

/// Metric: `chat_hub_processor_drops_total`
///
/// Labels: `reason` (`parse`, `invalid_id`, `empty`, `store`, `encode`)
pub fn record_processor_drop(reason: &'static str) {
    counter!("chat_hub_processor_drops_total", "reason" => reason).increment(1);
}

/// Metric: `chat_hub_processing_duration_seconds`
///
/// Labels: `kind` (`message`, `relay`)
pub fn record_processing_duration(kind: &'static str, duration: Duration) {
    histogram!("chat_hub_processing_duration_seconds", "kind" => kind)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Fanout
// ============================================================================

/// Metric: `chat_hub_bus_publish_total`
///
/// Labels: `status` (`success`, `error`, `timeout`)
pub fn record_bus_publish(status: &'static str, duration: Duration) {
    counter!("chat_hub_bus_publish_total", "status" => status).increment(1);
    histogram!("chat_hub_bus_publish_duration_seconds").record(duration.as_secs_f64());
}

/// Metric: `chat_hub_bus_events_received_total`
///
/// Labels: `status` (`accepted`, `rejected`, `own`)
pub fn record_bus_event_received(status: &'static str) {
    counter!("chat_hub_bus_events_received_total", "status" => status).increment(1);
}

/// Metric: `chat_hub_bus_resubscribe_total`
pub fn record_bus_resubscribe() {
    counter!("chat_hub_bus_resubscribe_total").increment(1);
}

// ============================================================================
// Handshake
// ============================================================================

/// Metric: `chat_hub_handshakes_total`
///
/// Labels: `status` (`accepted`, or the rejecting HTTP status code)
pub fn record_handshake(status: &'static str) {
    counter!("chat_hub_handshakes_total", "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_connection_opened();
        record_connection_closed();
        set_rooms_active(1);
        set_fanout_enabled(false);
        record_event_dispatched(false);
        record_eviction("queue_full");
        record_processing_duration("message", Duration::from_millis(4));
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_connection_opened();
            set_rooms_active(7);
            set_fanout_enabled(true);
            record_event_dispatched(false);
            record_event_dispatched(true);
            record_event_dispatched(true);
            record_deliveries(5);
            record_eviction("queue_full");
            record_processor_drop("empty");
            record_processing_duration("message", Duration::from_millis(12));
            record_bus_publish("success", Duration::from_millis(1));
            record_bus_event_received("accepted");
            record_bus_resubscribe();
            record_handshake("accepted");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let names: Vec<String> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "chat_hub_connections_active",
            "chat_hub_rooms_active",
            "chat_hub_fanout_enabled",
            "chat_hub_events_dispatched_total",
            "chat_hub_deliveries_total",
            "chat_hub_evictions_total",
            "chat_hub_processor_drops_total",
            "chat_hub_processing_duration_seconds",
            "chat_hub_bus_publish_total",
            "chat_hub_bus_publish_duration_seconds",
            "chat_hub_bus_events_received_total",
            "chat_hub_bus_resubscribe_total",
            "chat_hub_handshakes_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}"
            );
        }

        let bus_dispatches = snapshot.iter().find_map(|(key, _, _, value)| {
            let is_bus = key.key().name() == "chat_hub_events_dispatched_total"
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == "origin" && l.value() == "bus");
            match (is_bus, value) {
                (true, DebugValue::Counter(v)) => Some(*v),
                _ => None,
            }
        });
        assert_eq!(bus_dispatches, Some(2));

        for (key, _, _, _) in &snapshot {
            for label in key.key().labels() {
                assert!(
                    !matches!(label.key(), "room_id" | "user_id"),
                    "unbounded label on {}",
                    key.key().name()
                );
            }
        }
    }
}
