//! Tests for message types.

use super::*;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());
    assert!(QueueName::new("a".to_string()).is_ok());
    assert!(QueueName::new("q".repeat(160)).is_ok());

    // Invalid names
    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("q".repeat(161)).is_err());
    assert!(QueueName::new("-leading-hyphen".to_string()).is_err());
    assert!(QueueName::new("trailing-hyphen-".to_string()).is_err());
    assert!(QueueName::new("double--hyphen".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
    assert!(QueueName::new("dotted.name".to_string()).is_err());
    assert!(QueueName::new("colon:name".to_string()).is_err());
}

#[test]
fn test_namespace_default_and_validation() {
    assert_eq!(Namespace::default().as_str(), "rsmq");
    assert!(Namespace::new("worker-example".to_string()).is_ok());
    assert!(Namespace::new("".to_string()).is_err());
    assert!(Namespace::new("a:b".to_string()).is_err());
}

#[test]
fn test_message_id_text_form() {
    let queue = QueueName::new("test".to_string()).unwrap();
    let id = MessageId::new(queue.clone(), 42, "abcDEF1234".to_string());

    assert_eq!(id.to_string(), "test.00000000000000000042.abcDEF1234");
    assert_eq!(id.queue(), &queue);
    assert_eq!(id.sequence(), 42);
    assert!(id.belongs_to(&queue));
}

#[test]
fn test_message_id_parse() {
    let id: MessageId = "my_queue.00000000000000000007.Zz9".parse().unwrap();
    assert_eq!(id.queue().as_str(), "my_queue");
    assert_eq!(id.sequence(), 7);
    assert_eq!(id.suffix(), "Zz9");

    assert!("".parse::<MessageId>().is_err());
    assert!("no-dots".parse::<MessageId>().is_err());
    assert!("q.notdigits.abc".parse::<MessageId>().is_err());
    assert!("q.0001.".parse::<MessageId>().is_err());
    assert!("bad@queue.0001.abc".parse::<MessageId>().is_err());
}

#[test]
fn test_message_id_order_follows_sequence() {
    let queue = QueueName::new("q".to_string()).unwrap();
    let earlier = MessageId::new(queue.clone(), 9, "zzzz".to_string()).to_string();
    let later = MessageId::new(queue, 10, "aaaa".to_string()).to_string();
    assert!(earlier < later);
}

#[test]
fn test_generated_suffixes_are_distinct() {
    let first = MessageId::generate_suffix();
    let second = MessageId::generate_suffix();
    assert_eq!(first.len(), MESSAGE_ID_SUFFIX_LEN);
    assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(first, second);
}

#[test]
fn test_timestamp_millis_conversion() {
    let ts = Timestamp::from_millis(1_700_000_000_123).unwrap();
    assert_eq!(ts.as_millis(), 1_700_000_000_123);
    assert_eq!(ts.to_string(), "2023-11-14 22:13:20.123 UTC");
}

#[test]
fn test_visibility_window_is_measured_in_store_time() {
    // Store clock far behind the local clock
    let received = Timestamp::from_datetime(Utc::now() - Duration::hours(1));
    let message = ReceivedMessage {
        id: MessageId::new(QueueName::new("test".to_string()).unwrap(), 1, "abc".to_string()),
        body: Bytes::from("work"),
        receive_count: 1,
        first_received: received,
        sent: received,
        hidden_until: Some(Timestamp::from_datetime(
            received.as_datetime() + Duration::seconds(30),
        )),
        received,
    };

    assert_eq!(message.visibility_window(), Some(Duration::seconds(30)));

    let popped = ReceivedMessage {
        hidden_until: None,
        ..message
    };
    assert_eq!(popped.visibility_window(), None);
}

#[test]
fn test_message_builder() {
    let message = Message::from("Hello World").with_delay(Duration::seconds(5));
    assert_eq!(message.body, Bytes::from("Hello World"));
    assert_eq!(message.delay, Some(Duration::seconds(5)));
}

#[test]
fn test_received_message_serializes_body_as_base64() {
    let queue = QueueName::new("test".to_string()).unwrap();
    let now = Timestamp::from_millis(1_700_000_000_000).unwrap();
    let received = ReceivedMessage {
        id: MessageId::new(queue, 1, "abc".to_string()),
        body: Bytes::from("Hello World"),
        receive_count: 1,
        first_received: now,
        sent: now,
        hidden_until: None,
        received: now,
    };

    let json = serde_json::to_value(&received).unwrap();
    assert_eq!(json["id"], "test.00000000000000000001.abc");
    assert_eq!(json["body"], "SGVsbG8gV29ybGQ=");

    let back: ReceivedMessage = serde_json::from_value(json).unwrap();
    assert_eq!(back, received);
    assert_eq!(back.body_text(), Some("Hello World"));
}
