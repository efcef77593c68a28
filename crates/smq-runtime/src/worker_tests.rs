//! Tests for the worker.

use super::*;
use crate::client::QueueClientFactory;
use crate::clock::ManualClock;
use crate::message::Message;
use std::sync::Mutex;

fn queue() -> QueueName {
    QueueName::new("jobs".to_string()).unwrap()
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: std::time::Duration::from_millis(50),
        ..WorkerConfig::default()
    }
}

async fn client_with_messages(bodies: &[&str]) -> (Arc<dyn QueueClient>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let client = QueueClientFactory::create_test_client_with_clock(clock.clone());
    client
        .create_queue(&queue(), QueueSettings::default())
        .await
        .unwrap();
    for body in bodies {
        client
            .send_message(&queue(), Message::from(*body))
            .await
            .unwrap();
    }
    (client, clock)
}

async fn wait_until(handle: &WorkerHandle, done: impl Fn(WorkerStats) -> bool) {
    for _ in 0..1_000 {
        if done(handle.stats()) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("Worker did not reach expected state, stats: {:?}", handle.stats());
}

/// Records every body it sees and answers with a fixed outcome
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(String, u64)>>,
    retain: bool,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        self.seen.lock().unwrap().push((
            message.body_text().unwrap_or_default().to_string(),
            message.receive_count,
        ));
        if self.retain {
            Ok(HandlerOutcome::Retain)
        } else {
            Ok(HandlerOutcome::Ack)
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_acknowledges_handled_messages() {
    // Arrange
    let (client, _clock) = client_with_messages(&["one", "two", "three"]).await;
    let handler = Arc::new(RecordingHandler::default());

    // Act
    let handle = Worker::new(Arc::clone(&client), queue(), handler.clone(), fast_config())
        .start()
        .await
        .unwrap();
    wait_until(&handle, |stats| stats.acknowledged == 3).await;
    let stats = handle.shutdown().await;

    // Assert
    assert_eq!(stats.received, 3);
    assert_eq!(stats.failed, 0);
    let mut seen: Vec<String> = handler
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|(body, _)| body.clone())
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["one", "three", "two"]);

    let attributes = client.get_queue_attributes(&queue()).await.unwrap();
    assert_eq!(attributes.total_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retained_message_stays_hidden() {
    let (client, _clock) = client_with_messages(&["keep"]).await;
    let handler = Arc::new(RecordingHandler {
        retain: true,
        ..RecordingHandler::default()
    });

    let handle = Worker::new(Arc::clone(&client), queue(), handler.clone(), fast_config())
        .start()
        .await
        .unwrap();
    wait_until(&handle, |stats| stats.received == 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let stats = handle.shutdown().await;

    assert_eq!(stats.acknowledged, 0);
    let attributes = client.get_queue_attributes(&queue()).await.unwrap();
    assert_eq!(attributes.hidden_messages, 1);
}

/// Fails the first delivery of every message, acknowledges later ones
#[derive(Default)]
struct FailOnceHandler {
    errors: Mutex<Vec<String>>,
    counts: Mutex<Vec<u64>>,
}

#[async_trait]
impl MessageHandler for FailOnceHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        self.counts.lock().unwrap().push(message.receive_count);
        if message.receive_count == 1 {
            Err(HandlerError::new("transient processing failure"))
        } else {
            Ok(HandlerOutcome::Ack)
        }
    }

    async fn on_error(&self, error: &HandlerError, _message: &ReceivedMessage) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

#[tokio::test(start_paused = true)]
async fn test_handler_error_makes_message_visible_again() {
    // Arrange
    let (client, _clock) = client_with_messages(&["retry me"]).await;
    let handler = Arc::new(FailOnceHandler::default());

    // Act
    let handle = Worker::new(Arc::clone(&client), queue(), handler.clone(), fast_config())
        .start()
        .await
        .unwrap();
    wait_until(&handle, |stats| stats.acknowledged == 1).await;
    let stats = handle.shutdown().await;

    // Assert
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.received, 2);
    assert_eq!(*handler.counts.lock().unwrap(), vec![1, 2]);
    assert_eq!(
        *handler.errors.lock().unwrap(),
        vec!["transient processing failure".to_string()]
    );
}

/// Takes longer than any visibility window used in these tests
#[derive(Default)]
struct SlowHandler {
    deadlines: AtomicU64,
}

#[async_trait]
impl MessageHandler for SlowHandler {
    async fn handle(&self, _message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok(HandlerOutcome::Ack)
    }

    async fn on_deadline_passed(&self, _message: &ReceivedMessage) {
        self.deadlines.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_handler_past_deadline_is_reported() {
    let (client, _clock) = client_with_messages(&["slow"]).await;
    let handler = Arc::new(SlowHandler::default());
    let config = WorkerConfig {
        visibility_timeout: Some(Duration::seconds(2)),
        ..fast_config()
    };

    let handle = Worker::new(Arc::clone(&client), queue(), handler.clone(), config)
        .start()
        .await
        .unwrap();
    wait_until(&handle, |stats| stats.deadline_passed == 1).await;
    let stats = handle.shutdown().await;

    assert_eq!(stats.acknowledged, 0);
    assert_eq!(handler.deadlines.load(Ordering::SeqCst), 1);
    let attributes = client.get_queue_attributes(&queue()).await.unwrap();
    assert_eq!(attributes.total_messages(), 1);
}

/// Awaits briefly before acknowledging
struct BriefHandler;

#[async_trait]
impl MessageHandler for BriefHandler {
    async fn handle(&self, _message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(HandlerOutcome::Ack)
    }
}

#[tokio::test(start_paused = true)]
async fn test_handler_window_follows_store_clock_behind_local_clock() {
    // Arrange: store time a minute behind, longer than the 30s default window
    let behind = chrono::Utc::now().timestamp_millis() - 60_000;
    let clock = Arc::new(ManualClock::new(behind));
    let client = QueueClientFactory::create_test_client_with_clock(clock);
    client
        .create_queue(&queue(), QueueSettings::default())
        .await
        .unwrap();
    client
        .send_message(&queue(), Message::from("skewed"))
        .await
        .unwrap();

    // Act
    let handler = Arc::new(BriefHandler);
    let handle = Worker::new(Arc::clone(&client), queue(), handler, fast_config())
        .start()
        .await
        .unwrap();
    wait_until(&handle, |stats| stats.acknowledged == 1).await;
    let stats = handle.shutdown().await;

    // Assert
    assert_eq!(stats.received, 1);
    assert_eq!(stats.deadline_passed, 0);
    let attributes = client.get_queue_attributes(&queue()).await.unwrap();
    assert_eq!(attributes.total_messages(), 0);
}

/// Tracks how many handlers run at the same time
#[derive(Default)]
struct ConcurrencyProbe {
    running: AtomicU64,
    peak: AtomicU64,
}

#[async_trait]
impl MessageHandler for ConcurrencyProbe {
    async fn handle(&self, _message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(HandlerOutcome::Ack)
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    let (client, _clock) = client_with_messages(&["1", "2", "3", "4", "5"]).await;
    let handler = Arc::new(ConcurrencyProbe::default());
    let config = WorkerConfig {
        concurrency: 2,
        ..fast_config()
    };

    let handle = Worker::new(Arc::clone(&client), queue(), handler.clone(), config)
        .start()
        .await
        .unwrap();
    wait_until(&handle, |stats| stats.acknowledged == 5).await;
    handle.shutdown().await;

    assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_concurrency_is_rejected() {
    let (client, _clock) = client_with_messages(&[]).await;
    let config = WorkerConfig {
        concurrency: 0,
        ..WorkerConfig::default()
    };

    let result = Worker::new(client, queue(), Arc::new(RecordingHandler::default()), config)
        .start()
        .await;
    assert!(matches!(result, Err(QueueError::InvalidConfig { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_worker_creates_missing_queue() {
    let client = QueueClientFactory::create_test_client();

    let handle = Worker::new(
        Arc::clone(&client),
        queue(),
        Arc::new(RecordingHandler::default()),
        fast_config(),
    )
    .start()
    .await
    .unwrap();

    assert_eq!(client.list_queues().await.unwrap(), vec![queue()]);
    assert!(!handle.is_finished());
    handle.shutdown().await;
}
