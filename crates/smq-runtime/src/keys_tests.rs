//! Tests for the store key layout.

use super::*;

#[test]
fn test_default_namespace_layout() {
    let keys = KeySpace::new(Namespace::default());
    let queue = QueueName::new("test".to_string()).unwrap();

    assert_eq!(keys.queues(), "rsmq:QUEUES");

    let queue_keys = keys.queue(&queue);
    assert_eq!(queue_keys.attributes, "rsmq:test:Q");
    assert_eq!(queue_keys.messages, "rsmq:test:M");
    assert_eq!(queue_keys.ready, "rsmq:test:ready");
    assert_eq!(queue_keys.hidden, "rsmq:test:hidden");
}

#[test]
fn test_registry_keys_start_with_queue_set() {
    let keys = KeySpace::new(Namespace::new("jobs".to_string()).unwrap());
    let queue = QueueName::new("emails".to_string()).unwrap();

    assert_eq!(
        keys.registry_keys(&queue),
        vec![
            "jobs:QUEUES".to_string(),
            "jobs:emails:Q".to_string(),
            "jobs:emails:M".to_string(),
            "jobs:emails:ready".to_string(),
            "jobs:emails:hidden".to_string(),
        ]
    );
}

#[test]
fn test_namespaces_do_not_share_keys() {
    let queue = QueueName::new("test".to_string()).unwrap();
    let first = KeySpace::new(Namespace::new("one".to_string()).unwrap());
    let second = KeySpace::new(Namespace::new("two".to_string()).unwrap());

    assert_ne!(first.queue(&queue), second.queue(&queue));
    assert_ne!(first.queues(), second.queues());
}

#[test]
fn test_message_fields_cover_body_and_metadata() {
    assert_eq!(
        message_fields("test.00000000000000000001.abcdefghij"),
        vec![
            "test.00000000000000000001.abcdefghij".to_string(),
            "test.00000000000000000001.abcdefghij:rc".to_string(),
            "test.00000000000000000001.abcdefghij:fr".to_string(),
            "test.00000000000000000001.abcdefghij:sent".to_string(),
            "test.00000000000000000001.abcdefghij:rt".to_string(),
        ]
    );
}
