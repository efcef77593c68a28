//! Client traits and implementations for queue operations.
//!
//! [`QueueClient`] is the delivery coordinator: it validates caller input,
//! runs the matching registry or message store operation and surfaces every
//! failure unchanged. It holds no state of its own; all coordination state
//! lives in the store.

use crate::clock::Clock;
use crate::config::{ClientConfig, StoreConfig};
use crate::error::QueueError;
use crate::keys::KeySpace;
use crate::message::{Message, MessageId, Namespace, QueueName, ReceivedMessage, Timestamp};
use crate::message_store::MessageStore;
use crate::queue::{QueueAttributes, QueueSettings, QueueSettingsUpdate};
use crate::registry::{queue_not_found, QueueRegistry};
use crate::store::{Store, StoreKind};
use crate::stores::{InMemoryStore, RedisStore};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create a queue; `Ok(false)` when a queue with this name already exists
    async fn create_queue(
        &self,
        queue: &QueueName,
        settings: QueueSettings,
    ) -> Result<bool, QueueError>;

    /// Delete a queue and all of its messages
    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Names of all queues in the namespace
    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError>;

    /// Queue settings, counters and live message counts
    async fn get_queue_attributes(&self, queue: &QueueName)
        -> Result<QueueAttributes, QueueError>;

    /// Change some queue settings and return the refreshed attributes
    async fn set_queue_attributes(
        &self,
        queue: &QueueName,
        update: QueueSettingsUpdate,
    ) -> Result<QueueAttributes, QueueError>;

    /// Send single message to queue
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError>;

    /// Receive single message from queue, hiding it for `visibility_timeout`
    /// or the queue default
    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Receive single message from queue and delete it in the same step
    async fn pop_message(&self, queue: &QueueName)
        -> Result<Option<ReceivedMessage>, QueueError>;

    /// Mark message as successfully processed
    async fn delete_message(&self, queue: &QueueName, id: &MessageId) -> Result<(), QueueError>;

    /// Hide a received message for `timeout` from now; returns the new deadline
    async fn change_message_visibility(
        &self,
        queue: &QueueName,
        id: &MessageId,
        timeout: Duration,
    ) -> Result<Timestamp, QueueError>;

    /// Return received messages whose deadline passed to the ready state
    async fn release_expired_messages(&self, queue: &QueueName) -> Result<u64, QueueError>;

    /// Check that the store is reachable
    async fn health_check(&self) -> Result<(), QueueError>;

    /// Get store kind
    fn store_kind(&self) -> StoreKind;

    /// Namespace of this client's queues
    fn namespace(&self) -> &Namespace;
}

/// Factory for creating queue clients with appropriate stores
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub async fn create_client(config: &ClientConfig) -> Result<Arc<dyn QueueClient>, QueueError> {
        config.validate()?;
        let namespace = config.namespace()?;

        let store: Arc<dyn Store> = match &config.store {
            StoreConfig::Redis(redis_config) => Arc::new(RedisStore::connect(redis_config).await?),
            StoreConfig::InMemory => Arc::new(InMemoryStore::new()),
        };

        info!(namespace = %namespace, store = ?store.kind(), "Queue client created");
        Ok(Arc::new(StandardQueueClient::new(store, namespace)))
    }

    /// Create test client with in-memory store
    pub fn create_test_client() -> Arc<dyn QueueClient> {
        Arc::new(StandardQueueClient::new(
            Arc::new(InMemoryStore::new()),
            Namespace::default(),
        ))
    }

    /// Create test client with in-memory store reading time from `clock`
    pub fn create_test_client_with_clock(clock: Arc<dyn Clock>) -> Arc<dyn QueueClient> {
        Arc::new(StandardQueueClient::new(
            Arc::new(InMemoryStore::with_clock(clock)),
            Namespace::default(),
        ))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    store: Arc<dyn Store>,
    namespace: Namespace,
    registry: QueueRegistry,
    messages: MessageStore,
}

impl StandardQueueClient {
    /// Create new standard queue client over a store
    pub fn new(store: Arc<dyn Store>, namespace: Namespace) -> Self {
        let keys = KeySpace::new(namespace.clone());
        Self {
            registry: QueueRegistry::new(Arc::clone(&store), keys.clone()),
            messages: MessageStore::new(Arc::clone(&store), keys),
            store,
            namespace,
        }
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    #[instrument(skip_all, fields(queue = %queue))]
    async fn create_queue(
        &self,
        queue: &QueueName,
        settings: QueueSettings,
    ) -> Result<bool, QueueError> {
        let created = self.registry.create_queue(queue, &settings).await?;
        if created {
            info!(
                visibility_timeout = settings.visibility_timeout.num_seconds(),
                delay = settings.delay.num_seconds(),
                max_size = settings.max_size,
                "Queue created"
            );
        }
        Ok(created)
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn delete_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        if !self.registry.delete_queue(queue).await? {
            return Err(queue_not_found(queue));
        }
        info!("Queue deleted");
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        self.registry.list_queues().await
    }

    async fn get_queue_attributes(
        &self,
        queue: &QueueName,
    ) -> Result<QueueAttributes, QueueError> {
        self.registry.get_attributes(queue).await
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn set_queue_attributes(
        &self,
        queue: &QueueName,
        update: QueueSettingsUpdate,
    ) -> Result<QueueAttributes, QueueError> {
        if update.is_empty() {
            return Err(QueueError::InvalidConfig {
                message: "no queue attribute to update".to_string(),
            });
        }
        self.registry.set_attributes(queue, &update).await
    }

    #[instrument(skip_all, fields(queue = %queue, size = message.body.len()))]
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let id = self
            .messages
            .enqueue(queue, message.body, message.delay)
            .await?;
        debug!(message_id = %id, "Message sent");
        Ok(id)
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let received = self.messages.claim_ready(queue, visibility_timeout).await?;
        if let Some(message) = &received {
            debug!(
                message_id = %message.id,
                receive_count = message.receive_count,
                "Message received"
            );
        }
        Ok(received)
    }

    #[instrument(skip_all, fields(queue = %queue))]
    async fn pop_message(
        &self,
        queue: &QueueName,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let popped = self.messages.pop_ready(queue).await?;
        if let Some(message) = &popped {
            debug!(message_id = %message.id, "Message popped");
        }
        Ok(popped)
    }

    #[instrument(skip_all, fields(queue = %queue, message_id = %id))]
    async fn delete_message(&self, queue: &QueueName, id: &MessageId) -> Result<(), QueueError> {
        self.messages.remove(queue, id).await?;
        debug!("Message deleted");
        Ok(())
    }

    #[instrument(skip_all, fields(queue = %queue, message_id = %id))]
    async fn change_message_visibility(
        &self,
        queue: &QueueName,
        id: &MessageId,
        timeout: Duration,
    ) -> Result<Timestamp, QueueError> {
        let deadline = self.messages.extend_visibility(queue, id, timeout).await?;
        debug!(hidden_until = %deadline, "Message visibility changed");
        Ok(deadline)
    }

    async fn release_expired_messages(&self, queue: &QueueName) -> Result<u64, QueueError> {
        self.messages.release_expired_hidden(queue).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.store.ping().await.map_err(QueueError::from)
    }

    fn store_kind(&self) -> StoreKind {
        self.store.kind()
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

/// Receive with long polling: retry until a message arrives or `wait` elapses.
///
/// Each attempt is an ordinary atomic receive; the loop itself holds no claim.
pub async fn receive_with_wait(
    client: &dyn QueueClient,
    queue: &QueueName,
    visibility_timeout: Option<Duration>,
    wait: Duration,
    poll_interval: Duration,
) -> Result<Option<ReceivedMessage>, QueueError> {
    let wait = wait.to_std().unwrap_or_default();
    let poll_interval = poll_interval
        .to_std()
        .unwrap_or_default()
        .max(std::time::Duration::from_millis(1));
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        if let Some(message) = client.receive_message(queue, visibility_timeout).await? {
            return Ok(Some(message));
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
