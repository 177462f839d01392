//! Metrics for queuerator
//!
//! Provides Prometheus-compatible metrics through the `metrics` facade. No
//! recorder is installed by the library; without one every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    // Session metrics
    pub const MESSAGES_RECEIVED: &str = "queuerator_messages_received_total";
    pub const DECODE_ERRORS: &str = "queuerator_decode_errors_total";
    pub const MESSAGES_EVALUATED: &str = "queuerator_messages_evaluated_total";
    pub const EVALUATE_LATENCY: &str = "queuerator_evaluate_latency_seconds";

    // Connection metrics
    pub const CONNECTION_STATE: &str = "queuerator_connection_state";
    pub const CONNECTION_RECONNECTS: &str = "queuerator_reconnects_total";
    pub const SUBSCRIPTIONS: &str = "queuerator_subscriptions_total";
}

/// Labels for metrics
pub mod labels {
    pub const CLIENT: &str = "client_id";
    pub const MATCHED: &str = "matched";
    pub const STATUS: &str = "status";
    pub const TOPIC: &str = "topic";
}

/// Per-message session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    client_id: String,
}

impl SessionMetrics {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    /// Record message dequeued
    pub fn record_received(&self) {
        counter!(
            names::MESSAGES_RECEIVED,
            labels::CLIENT => self.client_id.clone(),
        )
        .increment(1);
    }

    /// Record undecodable payload
    pub fn record_decode_error(&self) {
        counter!(
            names::DECODE_ERRORS,
            labels::CLIENT => self.client_id.clone(),
        )
        .increment(1);
    }

    /// Record evaluation result
    pub fn record_result(&self, matched: bool) {
        counter!(
            names::MESSAGES_EVALUATED,
            labels::CLIENT => self.client_id.clone(),
            labels::MATCHED => if matched { "true" } else { "false" },
        )
        .increment(1);
    }

    /// Record evaluation latency
    pub fn record_evaluate_latency(&self, duration: Duration) {
        histogram!(
            names::EVALUATE_LATENCY,
            labels::CLIENT => self.client_id.clone(),
        )
        .record(duration.as_secs_f64());
    }
}

/// Connection metrics
#[derive(Clone)]
pub struct ConnectionMetrics {
    client_id: String,
}

impl ConnectionMetrics {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    /// Set connection state (1 = connected, 0 = disconnected)
    pub fn set_connected(&self, connected: bool) {
        gauge!(
            names::CONNECTION_STATE,
            labels::CLIENT => self.client_id.clone(),
        )
        .set(if connected { 1.0 } else { 0.0 });
    }

    /// Record reconnection attempt
    pub fn record_reconnect(&self) {
        counter!(
            names::CONNECTION_RECONNECTS,
            labels::CLIENT => self.client_id.clone(),
        )
        .increment(1);
    }

    /// Record subscription outcome
    pub fn record_subscription(&self, topic: &str, ok: bool) {
        counter!(
            names::SUBSCRIPTIONS,
            labels::CLIENT => self.client_id.clone(),
            labels::TOPIC => topic.to_string(),
            labels::STATUS => if ok { "ok" } else { "failed" },
        )
        .increment(1);
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        let mut recorded = None;
        {
            let timer = LatencyTimer::start(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
            timer.stop();
        }
        assert!(recorded.is_some());
        assert!(recorded.unwrap() >= Duration::from_millis(10));
    }

    #[test]
    fn test_metrics_without_recorder() {
        let session = SessionMetrics::new("test");
        session.record_received();
        session.record_result(true);

        let connection = ConnectionMetrics::new("test");
        connection.set_connected(true);
        connection.record_subscription("a.1", false);
    }
}
