//! Prometheus metrics for the bar feed
//!
//! Per-feed counters for message flow and persistence, gauges for upstream health.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

use crate::health::ConnectionHealth;
use crate::message::BarKind;

/// Labels used for metrics
const LABEL_FEED: &str = "feed";
const LABEL_MESSAGE_TYPE: &str = "message_type";
const LABEL_KIND: &str = "kind";
const LABEL_REASON: &str = "reason";

/// Framed messages received, by primary key
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "barfeed_messages_total",
        "Total framed messages received from the gateway",
        &[LABEL_FEED, LABEL_MESSAGE_TYPE]
    )
    .expect("Failed to register messages_total metric")
});

/// Bars decoded, by kind
static BARS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "barfeed_bars_total",
        "Total bars decoded by kind (update, live, history)",
        &[LABEL_FEED, LABEL_KIND]
    )
    .expect("Failed to register bars_total metric")
});

/// Records dropped because a field could not be parsed
static DECODE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "barfeed_decode_failures_total",
        "Records dropped because a field could not be parsed",
        &[LABEL_FEED]
    )
    .expect("Failed to register decode_failures_total metric")
});

/// Upstream health (0 = disconnected, 1 = connected, 2 = stale, 3 = reconnect failed)
static FEED_HEALTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "barfeed_feed_health",
        "Upstream health reported by the gateway (0=disconnected, 1=connected, 2=stale, 3=reconnect_failed)",
        &[LABEL_FEED]
    )
    .expect("Failed to register feed_health metric")
});

/// Latched once the gateway reports a failed reconnect
static RECONNECT_FAILED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "barfeed_reconnect_failed",
        "1 once the gateway has reported SERVER RECONNECT FAILED",
        &[LABEL_FEED]
    )
    .expect("Failed to register reconnect_failed metric")
});

/// Events pushed but not yet processed by the router
static QUEUE_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "barfeed_queue_in_flight",
        "Events queued or being processed by the bar router",
        &[LABEL_FEED]
    )
    .expect("Failed to register queue_in_flight metric")
});

/// Bars written to the store
static BARS_STORED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "barfeed_bars_stored_total",
        "Total bars inserted into the store",
        &[LABEL_FEED]
    )
    .expect("Failed to register bars_stored_total metric")
});

/// Bars not written, by reason
static BARS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "barfeed_bars_dropped_total",
        "Bars not inserted (unknown_symbol, missing_table, store_error)",
        &[LABEL_FEED, LABEL_REASON]
    )
    .expect("Failed to register bars_dropped_total metric")
});

/// Handle for recording metrics for one feed
#[derive(Clone)]
pub struct FeedMetrics {
    feed: String,
}

impl FeedMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    /// Record one framed message by its primary key
    pub fn inc_message(&self, key: Option<char>) {
        let mut buf = [0u8; 4];
        let label = match key {
            Some(c) => &*c.encode_utf8(&mut buf),
            None => "empty",
        };
        MESSAGES_TOTAL
            .with_label_values(&[self.feed.as_str(), label])
            .inc();
    }

    pub fn inc_bar(&self, kind: BarKind) {
        BARS_TOTAL
            .with_label_values(&[self.feed.as_str(), kind.as_str()])
            .inc();
    }

    pub fn inc_decode_failure(&self) {
        DECODE_FAILURES_TOTAL
            .with_label_values(&[self.feed.as_str()])
            .inc();
    }

    pub fn set_health(&self, health: ConnectionHealth) {
        FEED_HEALTH
            .with_label_values(&[self.feed.as_str()])
            .set(health as i64);
    }

    pub fn set_reconnect_failed(&self) {
        RECONNECT_FAILED
            .with_label_values(&[self.feed.as_str()])
            .set(1);
    }

    pub fn set_queue_in_flight(&self, count: usize) {
        QUEUE_IN_FLIGHT
            .with_label_values(&[self.feed.as_str()])
            .set(count as i64);
    }

    #[cfg(test)]
    pub(crate) fn queue_in_flight(&self) -> i64 {
        QUEUE_IN_FLIGHT
            .with_label_values(&[self.feed.as_str()])
            .get()
    }

    pub fn inc_stored(&self) {
        BARS_STORED_TOTAL
            .with_label_values(&[self.feed.as_str()])
            .inc();
    }

    pub fn inc_dropped(&self, reason: &str) {
        BARS_DROPPED_TOTAL
            .with_label_values(&[self.feed.as_str(), reason])
            .inc();
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
