//! Integration tests for concurrent callers on one queue
//!
//! These tests verify:
//! - Concurrent sends never share a sequence number
//! - Racing receives hand a message to exactly one caller
//! - A worker pool processes every message exactly once when it acknowledges

mod common;

use async_trait::async_trait;
use common::{create_queue, memory_client};
use smq_runtime::{
    HandlerError, HandlerOutcome, Message, MessageHandler, QueueClient, ReceivedMessage, Worker,
    WorkerConfig,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

const SENDERS: usize = 8;
const MESSAGES_PER_SENDER: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_get_distinct_increasing_sequences() {
    // Arrange
    let (client, _clock) = memory_client();
    let queue = create_queue(client.as_ref(), "busy").await;

    // Act
    let mut tasks = Vec::new();
    for sender in 0..SENDERS {
        let client = client.clone();
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for n in 0..MESSAGES_PER_SENDER {
                let body = format!("{}-{}", sender, n);
                ids.push(
                    client
                        .send_message(&queue, Message::from(body.as_str()))
                        .await
                        .unwrap(),
                );
            }
            ids
        }));
    }

    let mut all_sequences = HashSet::new();
    for task in tasks {
        let ids = task.await.unwrap();

        // Assert: each caller observes strictly increasing sequences
        for pair in ids.windows(2) {
            assert!(
                pair[0].sequence() < pair[1].sequence(),
                "{} should precede {}",
                pair[0],
                pair[1]
            );
        }
        for id in ids {
            assert!(all_sequences.insert(id.sequence()), "duplicate {}", id);
        }
    }

    // Assert: no sequence was handed out twice
    assert_eq!(all_sequences.len(), SENDERS * MESSAGES_PER_SENDER);
    let attributes = client.get_queue_attributes(&queue).await.unwrap();
    assert_eq!(attributes.total_sent, (SENDERS * MESSAGES_PER_SENDER) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_receives_claim_single_message_once() {
    for _ in 0..20 {
        // Arrange
        let (client, _clock) = memory_client();
        let queue = create_queue(client.as_ref(), "race").await;
        let id = client
            .send_message(&queue, Message::from("only one"))
            .await
            .unwrap();

        // Act
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let client = client.clone();
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                client.receive_message(&queue, None).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            if let Some(message) = task.await.unwrap() {
                winners.push(message);
            }
        }

        // Assert
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, id);
        assert_eq!(winners[0].receive_count, 1);
        let attributes = client.get_queue_attributes(&queue).await.unwrap();
        assert_eq!(attributes.total_received, 1);
    }
}

// ============================================================================
// Worker pool
// ============================================================================

#[derive(Default)]
struct CollectingHandler {
    bodies: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        let body = message
            .body_text()
            .ok_or_else(|| HandlerError::new("body is not UTF-8"))?;
        self.bodies.lock().unwrap().push(body.to_string());
        Ok(HandlerOutcome::Ack)
    }
}

async fn drain_with_workers(client: Arc<dyn QueueClient>, workers: usize) -> Vec<String> {
    let queue = common::queue("pool");
    let handler = Arc::new(CollectingHandler::default());
    let config = WorkerConfig {
        concurrency: 4,
        poll_interval: std::time::Duration::from_millis(10),
        visibility_timeout: None,
        create_queue: false,
    };

    let mut handles = Vec::new();
    for _ in 0..workers {
        handles.push(
            Worker::new(client.clone(), queue.clone(), handler.clone(), config.clone())
                .start()
                .await
                .unwrap(),
        );
    }

    for _ in 0..500 {
        if client.get_queue_attributes(&queue).await.unwrap().total_messages() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    for handle in handles {
        handle.shutdown().await;
    }
    let bodies = handler.bodies.lock().unwrap().clone();
    bodies
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_processes_each_message_once() {
    // Arrange
    let (client, _clock) = memory_client();
    let queue = create_queue(client.as_ref(), "pool").await;
    for n in 0..40 {
        client
            .send_message(&queue, Message::from(n.to_string().as_str()))
            .await
            .unwrap();
    }

    // Act
    let mut bodies = drain_with_workers(client.clone(), 3).await;

    // Assert
    bodies.sort_by_key(|body| body.parse::<u32>().unwrap());
    let expected: Vec<String> = (0..40).map(|n: u32| n.to_string()).collect();
    assert_eq!(bodies, expected);
    let attributes = client.get_queue_attributes(&queue).await.unwrap();
    assert_eq!(attributes.total_received, 40);
    assert_eq!(attributes.total_messages(), 0);
}
