//! Tests for the service metrics.

use super::*;
use chrono::Utc;
use smq_runtime::{QueueName, Timestamp};

fn attributes(ready: u64, delayed: u64, hidden: u64) -> QueueAttributes {
    let now = Timestamp::from_datetime(Utc::now());
    QueueAttributes {
        name: QueueName::new("orders".to_string()).unwrap(),
        visibility_timeout: 30,
        delay: 0,
        max_size: 65536,
        created: now,
        modified: now,
        total_sent: 0,
        total_received: 0,
        ready_messages: ready,
        delayed_messages: delayed,
        hidden_messages: hidden,
    }
}

#[test]
fn test_independent_instances_do_not_conflict() {
    let first = ServiceMetrics::new();
    let second = ServiceMetrics::new();
    assert!(first.is_ok());
    assert!(second.is_ok());
}

#[test]
fn test_operations_are_counted_by_outcome() {
    let metrics = ServiceMetrics::new().unwrap();

    metrics.record_operation("send_message", OUTCOME_OK);
    metrics.record_operation("send_message", OUTCOME_OK);
    metrics.record_operation("send_message", "queue_not_found");

    assert_eq!(
        metrics
            .operations_total
            .with_label_values(&["send_message", OUTCOME_OK])
            .get(),
        2
    );
    assert_eq!(
        metrics
            .operations_total
            .with_label_values(&["send_message", "queue_not_found"])
            .get(),
        1
    );
}

#[test]
fn test_queue_depth_gauges() {
    let metrics = ServiceMetrics::new().unwrap();

    metrics.record_queue_depth(&attributes(3, 1, 2));

    assert_eq!(
        metrics
            .queue_messages
            .with_label_values(&["orders", "ready"])
            .get(),
        3
    );
    assert_eq!(
        metrics
            .queue_messages
            .with_label_values(&["orders", "hidden"])
            .get(),
        2
    );

    metrics.forget_queue("orders");
    let rendered = metrics.render().unwrap();
    assert!(!rendered.contains("queue=\"orders\""));
}

#[test]
fn test_render_uses_prefixed_names() {
    let metrics = ServiceMetrics::new().unwrap();
    metrics.record_message("orders", "sent");
    metrics.record_http_request(std::time::Duration::from_millis(5));

    let rendered = metrics.render().unwrap();

    assert!(rendered.contains("smq_messages_total"));
    assert!(rendered.contains("smq_http_request_duration_seconds"));
}
