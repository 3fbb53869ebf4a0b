//! Prometheus metrics for the broker core and its notification subsystem.
//!
//! - Routing metrics (published, delivered, expired messages)
//! - Notification metrics (emitted by kind, dropped, filter rejections)
//! - Plugin chain metrics (listener failures)
//! - Resource gauges (addresses, queues, consumers, connections)

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "embermq";

lazy_static! {
    // ============================================================================
    // Routing Metrics
    // ============================================================================

    /// Messages accepted by the post office
    pub static ref MESSAGES_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_published_total", METRIC_PREFIX),
        "Total messages accepted by the post office"
    ).unwrap();

    /// Messages that matched no bound queue and were dropped
    pub static ref MESSAGES_UNROUTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_unrouted_total", METRIC_PREFIX),
        "Total messages dropped because no queue was bound to the address"
    ).unwrap();

    /// Messages handed to a consumer
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages delivered to consumers"
    ).unwrap();

    /// Messages discarded through expiry
    pub static ref MESSAGES_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_expired_total", METRIC_PREFIX),
        "Total messages discarded because they expired"
    ).unwrap();

    // ============================================================================
    // Notification Metrics
    // ============================================================================

    /// Notifications published to the management address, by kind
    pub static ref NOTIFICATIONS_EMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_emitted_total", METRIC_PREFIX),
        "Total management notifications published",
        &["kind"]
    ).unwrap();

    /// Notifications dropped because nothing was bound to the management address
    pub static ref NOTIFICATIONS_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_dropped_total", METRIC_PREFIX),
        "Total management notifications dropped without a subscriber"
    ).unwrap();

    /// Selector compilations rejected at subscription time
    pub static ref FILTER_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_filter_rejected_total", METRIC_PREFIX),
        "Total subscriptions rejected for selector syntax errors"
    ).unwrap();

    // ============================================================================
    // Plugin Chain Metrics
    // ============================================================================

    /// Listener invocations that failed or panicked, by callback
    pub static ref PLUGIN_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_plugin_failures_total", METRIC_PREFIX),
        "Total plugin callback failures (caught and logged)",
        &["callback"]
    ).unwrap();

    // ============================================================================
    // Resource Gauges
    // ============================================================================

    /// Currently registered addresses
    pub static ref ADDRESSES_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_addresses_active", METRIC_PREFIX),
        "Number of registered addresses"
    ).unwrap();

    /// Currently bound queues
    pub static ref QUEUES_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_queues_active", METRIC_PREFIX),
        "Number of bound queues"
    ).unwrap();

    /// Currently attached consumers
    pub static ref CONSUMERS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_consumers_active", METRIC_PREFIX),
        "Number of attached consumers"
    ).unwrap();

    /// Currently open connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of open connections"
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // Initialize some metrics first (lazy_static requires first access)
        QUEUES_ACTIVE.set(1);

        let result = encode_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("embermq_queues_active"));
    }

    #[test]
    fn test_notification_metrics() {
        NOTIFICATIONS_EMITTED_TOTAL
            .with_label_values(&["BINDING_ADDED"])
            .inc();
        NOTIFICATIONS_DROPPED_TOTAL.inc();
        FILTER_REJECTED_TOTAL.inc();
        PLUGIN_FAILURES_TOTAL.with_label_values(&["after_deliver"]).inc();
        // Just verify no panics
    }
}
