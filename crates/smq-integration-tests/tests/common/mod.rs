//! Common test utilities for SMQ integration tests
//!
//! This module provides:
//! - Clients on the in-memory store with a controllable clock
//! - Opt-in clients on a live Redis
//! - An HTTP request helper for the API router

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use smq_api::{AppState, ServiceConfig};
use smq_runtime::{
    ClientConfig, ManualClock, QueueClient, QueueClientFactory, QueueName, QueueSettings,
    RedisConfig, StoreConfig,
};
use std::sync::Arc;
use tower::ServiceExt;

/// Environment variable naming the Redis instance for the live suite
pub const REDIS_URL_VAR: &str = "SMQ_TEST_REDIS_URL";

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

// ============================================================================
// Clients
// ============================================================================

/// In-memory client whose store time only moves through the returned clock
pub fn memory_client() -> (Arc<dyn QueueClient>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let client = QueueClientFactory::create_test_client_with_clock(clock.clone());
    (client, clock)
}

/// Client on the Redis at `SMQ_TEST_REDIS_URL` in a fresh namespace.
///
/// `None` when the variable is unset, so the live suite is skipped.
pub async fn redis_client() -> Option<Arc<dyn QueueClient>> {
    let url = std::env::var(REDIS_URL_VAR).ok()?;
    let config = ClientConfig {
        namespace: format!("smqtest_{}", uuid::Uuid::new_v4().simple()),
        store: StoreConfig::Redis(RedisConfig::new(url)),
    };
    Some(
        QueueClientFactory::create_client(&config)
            .await
            .expect("live Redis should be reachable"),
    )
}

/// Create `name` with default settings and return it
pub async fn create_queue(client: &dyn QueueClient, name: &str) -> QueueName {
    let queue = queue(name);
    assert!(client
        .create_queue(&queue, QueueSettings::default())
        .await
        .unwrap());
    queue
}

/// Remove every queue the client can see
pub async fn delete_all_queues(client: &dyn QueueClient) {
    for queue in client.list_queues().await.unwrap() {
        client.delete_queue(&queue).await.unwrap();
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Router over `client` with the default service configuration
pub fn create_test_app(client: Arc<dyn QueueClient>) -> Router {
    let state = AppState::new(ServiceConfig::default(), client).unwrap();
    smq_api::create_router(state)
}

/// Send one request and return the status and the JSON body (`Null` when empty)
pub async fn send_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
