//! Metrics collection for the API service.
//!
//! Every [`ServiceMetrics`] owns its own registry, so several routers (one per
//! test, for instance) can coexist in one process.

use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use smq_runtime::QueueAttributes;
use std::sync::Arc;

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

/// Label value of a successful operation
pub const OUTCOME_OK: &str = "ok";

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_request_duration: Histogram,

    // Queue operation metrics
    pub operations_total: IntCounterVec,
    pub messages_total: IntCounterVec,
    pub queue_messages: IntGaugeVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some("smq".to_string()), None)?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request processing time",
            )
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0, 30.0]),
        )?;
        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Queue operations by outcome"),
            &["operation", "outcome"],
        )?;
        let messages_total = IntCounterVec::new(
            Opts::new("messages_total", "Messages sent, received and deleted"),
            &["queue", "action"],
        )?;
        let queue_messages = IntGaugeVec::new(
            Opts::new("queue_messages", "Messages stored per queue and state"),
            &["queue", "state"],
        )?;

        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(queue_messages.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_request_duration,
            operations_total,
            messages_total,
            queue_messages,
        }))
    }

    pub fn record_http_request(&self, duration: std::time::Duration) {
        self.http_request_duration.observe(duration.as_secs_f64());
    }

    /// Count one operation; `outcome` is [`OUTCOME_OK`] or an error code
    pub fn record_operation(&self, operation: &str, outcome: &str) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_message(&self, queue: &str, action: &str) {
        self.messages_total.with_label_values(&[queue, action]).inc();
    }

    /// Refresh the per-state message gauges of one queue
    pub fn record_queue_depth(&self, attributes: &QueueAttributes) {
        let queue = attributes.name.as_str();
        for (state, count) in [
            ("ready", attributes.ready_messages),
            ("delayed", attributes.delayed_messages),
            ("hidden", attributes.hidden_messages),
        ] {
            self.queue_messages
                .with_label_values(&[queue, state])
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    /// Drop the gauges of a deleted queue
    pub fn forget_queue(&self, queue: &str) {
        for state in ["ready", "delayed", "hidden"] {
            let _ = self.queue_messages.remove_label_values(&[queue, state]);
        }
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
