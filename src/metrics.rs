//! Metrics for observability.
//!
//! Emitted through the `metrics` facade; the embedding process installs the
//! recorder (Prometheus exporter or otherwise). Without a recorder every call
//! is a no-op.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `pulsar_sync_`:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track durations in seconds
//!
//! # Usage
//!
//! ```rust,no_run
//! use pulsar_sync::metrics;
//! use std::time::Duration;
//!
//! metrics::record_discovery_pass("topic", true, 12, Duration::from_millis(40));
//! metrics::record_messages_replicated("persistent://t1/ns1/orders", 1);
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Discovery
// =============================================================================

/// Record one discovery pass at `level` (`tenant`, `namespace`, `topic`).
pub fn record_discovery_pass(level: &'static str, success: bool, discovered: usize, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("pulsar_sync_discovery_passes_total", "level" => level, "status" => status).increment(1);
    if success {
        gauge!("pulsar_sync_discovered_entities", "level" => level).set(discovered as f64);
    }
    histogram!("pulsar_sync_discovery_duration_seconds", "level" => level).record(duration.as_secs_f64());
}

/// Record a child manager or worker created by discovery.
pub fn record_registration(level: &'static str) {
    counter!("pulsar_sync_registrations_total", "level" => level).increment(1);
}

/// Record names skipped by discovery filters (`partition_shard`, `system_topic`, ...).
pub fn record_filtered(level: &'static str, reason: &'static str, count: usize) {
    if count > 0 {
        counter!("pulsar_sync_filtered_total", "level" => level, "reason" => reason).increment(count as u64);
    }
}

/// Record an attempt to create an entity on the destination.
pub fn record_entity_mirror(level: &'static str, outcome: &'static str) {
    counter!("pulsar_sync_entity_mirror_total", "level" => level, "outcome" => outcome).increment(1);
}

/// Gauge for registered children at one level, across the whole tree.
pub fn adjust_registered(level: &'static str, delta: f64) {
    gauge!("pulsar_sync_registered", "level" => level).increment(delta);
}

// =============================================================================
// Workers
// =============================================================================

/// Record a worker state transition.
pub fn record_worker_state(topic: &str, state: &'static str) {
    counter!("pulsar_sync_worker_transitions_total", "topic" => topic.to_string(), "state" => state).increment(1);
}

pub fn record_messages_read(topic: &str, count: usize) {
    counter!("pulsar_sync_messages_read_total", "topic" => topic.to_string()).increment(count as u64);
}

/// Record messages written to the destination and acknowledged on the source.
pub fn record_messages_replicated(topic: &str, count: usize) {
    counter!("pulsar_sync_messages_replicated_total", "topic" => topic.to_string()).increment(count as u64);
}

pub fn record_write_retry(topic: &str) {
    counter!("pulsar_sync_write_retries_total", "topic" => topic.to_string()).increment(1);
}

/// Record end-to-end latency from read to source acknowledgement.
pub fn record_replication_latency(topic: &str, duration: Duration) {
    histogram!("pulsar_sync_replication_duration_seconds", "topic" => topic.to_string())
        .record(duration.as_secs_f64());
}

pub fn set_in_flight(topic: &str, in_flight: usize) {
    gauge!("pulsar_sync_in_flight", "topic" => topic.to_string()).set(in_flight as f64);
}

/// Record errors by type.
pub fn record_error(topic: &str, error_type: &'static str) {
    counter!("pulsar_sync_errors_total", "topic" => topic.to_string(), "error_type" => error_type).increment(1);
}

/// Record a worker that stopped reading after exhausting its retry budget.
pub fn record_suspension(topic: &str) {
    counter!("pulsar_sync_worker_suspensions_total", "topic" => topic.to_string()).increment(1);
}

/// Record a component that missed its close deadline.
pub fn record_shutdown_timeout(component: &'static str) {
    counter!("pulsar_sync_shutdown_timeouts_total", "component" => component).increment(1);
}

// =============================================================================
// Cursors
// =============================================================================

/// Record cursor flush batch (debounced writes).
pub fn record_cursor_flush(flushed: usize, errors: usize) {
    counter!("pulsar_sync_cursor_flushes_total").increment(1);
    counter!("pulsar_sync_cursor_flushed_count").increment(flushed as u64);
    if errors > 0 {
        counter!("pulsar_sync_cursor_flush_errors_total").increment(errors as u64);
    }
}

/// Record cursor SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_cursor_retry(operation: &str) {
    counter!("pulsar_sync_cursor_retries_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Gauge for orchestrator state.
pub fn set_orchestrator_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "Closing" => 3.0,
        "Closed" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("pulsar_sync_orchestrator_state").set(value);
}
