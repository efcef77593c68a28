//! Tests for the queue registry.

use super::*;
use crate::clock::ManualClock;
use crate::message::Namespace;
use crate::stores::InMemoryStore;
use chrono::Duration;

const START_MILLIS: i64 = 1_700_000_000_000;

fn registry() -> (QueueRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    (
        QueueRegistry::new(store, KeySpace::new(Namespace::default())),
        clock,
    )
}

fn name(value: &str) -> QueueName {
    QueueName::new(value.to_string()).unwrap()
}

// ============================================================================
// Queue Creation
// ============================================================================

mod creation {
    use super::*;

    #[tokio::test]
    async fn test_create_queue_with_defaults() {
        // Arrange
        let (registry, _clock) = registry();

        // Act
        let created = registry
            .create_queue(&name("test"), &QueueSettings::default())
            .await
            .unwrap();

        // Assert
        assert!(created);
        let attributes = registry.get_attributes(&name("test")).await.unwrap();
        assert_eq!(attributes.visibility_timeout, 30);
        assert_eq!(attributes.delay, 0);
        assert_eq!(attributes.max_size, 65536);
        assert_eq!(attributes.created.as_millis(), START_MILLIS);
        assert_eq!(attributes.modified.as_millis(), START_MILLIS);
        assert_eq!(attributes.total_sent, 0);
        assert_eq!(attributes.total_received, 0);
        assert_eq!(attributes.total_messages(), 0);
    }

    #[tokio::test]
    async fn test_second_create_returns_false_and_keeps_attributes() {
        // Arrange
        let (registry, clock) = registry();
        let original = QueueSettings::default().with_visibility_timeout(Duration::seconds(60));
        assert!(registry.create_queue(&name("test"), &original).await.unwrap());

        // Act
        clock.advance(Duration::seconds(10));
        let replacement = QueueSettings::default()
            .with_visibility_timeout(Duration::seconds(5))
            .with_max_size(2048);
        let created = registry.create_queue(&name("test"), &replacement).await.unwrap();

        // Assert
        assert!(!created);
        let attributes = registry.get_attributes(&name("test")).await.unwrap();
        assert_eq!(attributes.visibility_timeout, 60);
        assert_eq!(attributes.max_size, 65536);
        assert_eq!(attributes.created.as_millis(), START_MILLIS);
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected_before_creation() {
        let (registry, _clock) = registry();
        let settings = QueueSettings::default().with_max_size(0);

        match registry.create_queue(&name("test"), &settings).await {
            Err(QueueError::InvalidConfig { message }) => assert!(message.contains("max_size")),
            other => panic!("Expected InvalidConfig, got: {:?}", other),
        }
        assert!(registry.list_queues().await.unwrap().is_empty());
    }
}

// ============================================================================
// Attributes
// ============================================================================

mod attributes {
    use super::*;

    #[tokio::test]
    async fn test_get_attributes_of_missing_queue() {
        let (registry, _clock) = registry();

        match registry.get_attributes(&name("missing")).await {
            Err(QueueError::QueueNotFound { queue_name }) => assert_eq!(queue_name, "missing"),
            other => panic!("Expected QueueNotFound, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_attributes_updates_only_provided_fields() {
        // Arrange
        let (registry, clock) = registry();
        registry
            .create_queue(&name("test"), &QueueSettings::default())
            .await
            .unwrap();
        clock.advance(Duration::seconds(3));

        // Act
        let update = QueueSettingsUpdate::new().delay(Duration::seconds(7));
        let attributes = registry.set_attributes(&name("test"), &update).await.unwrap();

        // Assert
        assert_eq!(attributes.delay, 7);
        assert_eq!(attributes.visibility_timeout, 30);
        assert_eq!(attributes.max_size, 65536);
        assert_eq!(attributes.created.as_millis(), START_MILLIS);
        assert_eq!(attributes.modified.as_millis(), START_MILLIS + 3_000);
    }

    #[tokio::test]
    async fn test_set_attributes_validates_and_requires_queue() {
        let (registry, _clock) = registry();

        let update = QueueSettingsUpdate::new().visibility_timeout(Duration::seconds(10));
        assert!(matches!(
            registry.set_attributes(&name("missing"), &update).await,
            Err(QueueError::QueueNotFound { .. })
        ));

        registry
            .create_queue(&name("test"), &QueueSettings::default())
            .await
            .unwrap();
        let update = QueueSettingsUpdate::new().visibility_timeout(Duration::seconds(-1));
        assert!(matches!(
            registry.set_attributes(&name("test"), &update).await,
            Err(QueueError::InvalidConfig { .. })
        ));
    }
}

// ============================================================================
// Deletion and Listing
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_list_queues_is_sorted() {
        let (registry, _clock) = registry();
        for queue in ["orders", "emails", "test"] {
            registry
                .create_queue(&name(queue), &QueueSettings::default())
                .await
                .unwrap();
        }

        let queues = registry.list_queues().await.unwrap();
        assert_eq!(queues, vec![name("emails"), name("orders"), name("test")]);
    }

    #[tokio::test]
    async fn test_delete_queue_is_idempotent() {
        // Arrange
        let (registry, _clock) = registry();
        registry
            .create_queue(&name("test"), &QueueSettings::default())
            .await
            .unwrap();

        // Act
        let first = registry.delete_queue(&name("test")).await.unwrap();
        let second = registry.delete_queue(&name("test")).await.unwrap();

        // Assert
        assert!(first);
        assert!(!second);
        assert!(registry.list_queues().await.unwrap().is_empty());
        assert!(matches!(
            registry.get_attributes(&name("test")).await,
            Err(QueueError::QueueNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_recreated_queue_starts_fresh() {
        let (registry, _clock) = registry();
        let settings = QueueSettings::default().with_delay(Duration::seconds(4));
        registry.create_queue(&name("test"), &settings).await.unwrap();
        registry.delete_queue(&name("test")).await.unwrap();

        assert!(registry
            .create_queue(&name("test"), &QueueSettings::default())
            .await
            .unwrap());
        let attributes = registry.get_attributes(&name("test")).await.unwrap();
        assert_eq!(attributes.delay, 0);
    }
}
