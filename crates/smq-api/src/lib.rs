//! # SMQ HTTP Service
//!
//! REST surface over a [`QueueClient`].
//!
//! This service provides:
//! - Queue management: create, list, inspect, update, delete
//! - Message operations: send, receive (with optional long polling), pop,
//!   delete, change visibility
//! - Health check and Prometheus metrics endpoints
//!
//! Message bodies travel base64-encoded inside JSON.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::Duration;
use serde::de::DeserializeOwned;
use smq_runtime::{
    receive_with_wait, Message, MessageId, QueueClient, QueueName, QueueSettings,
    QueueSettingsUpdate, Timestamp,
};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

pub use config::{LoggingConfig, ServerConfig, ServiceConfig};
pub use errors::{ApiError, ConfigError, ErrorBody, ServiceError};
pub use metrics::ServiceMetrics;
pub use responses::*;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Queue operations
    pub client: Arc<dyn QueueClient>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServiceConfig, client: Arc<dyn QueueClient>) -> Result<Self, ServiceError> {
        let metrics = ServiceMetrics::new().map_err(|e| {
            ServiceError::Configuration(ConfigError::Invalid {
                message: format!("Failed to initialize metrics: {}", e),
            })
        })?;

        Ok(Self {
            config,
            client,
            metrics,
        })
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let queue_routes = Router::new()
        .route("/queues", get(list_queues).post(create_queue))
        .route(
            "/queues/{queue}",
            get(get_queue_attributes)
                .patch(set_queue_attributes)
                .delete(delete_queue),
        )
        .route("/queues/{queue}/release", post(release_expired));

    let message_routes = Router::new()
        .route("/queues/{queue}/messages", post(send_message))
        .route("/queues/{queue}/messages/receive", post(receive_message))
        .route("/queues/{queue}/messages/pop", post(pop_message))
        .route(
            "/queues/{queue}/messages/{message_id}",
            axum::routing::delete(delete_message),
        )
        .route(
            "/queues/{queue}/messages/{message_id}/visibility",
            put(change_message_visibility),
        );

    let observability_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint));

    let mut router = Router::new()
        .merge(queue_routes)
        .merge(message_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(state.config.server.max_body_size))
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        );

    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Start HTTP server and run it until SIGINT or SIGTERM
pub async fn start_server(
    config: ServiceConfig,
    client: Arc<dyn QueueClient>,
) -> Result<(), ServiceError> {
    let address = config.server.bind_address();
    let listener =
        tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: address.clone(),
                message: e.to_string(),
            })?;

    info!(address = %address, "Starting HTTP server");
    let state = AppState::new(config, client)?;
    serve(listener, state, shutdown_signal()).await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Serve requests on `listener` until `shutdown` completes.
///
/// In-flight requests get `shutdown_timeout_seconds` to finish after that.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    let shutdown_timeout =
        std::time::Duration::from_secs(state.config.server.shutdown_timeout_seconds);
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let app = create_router(state);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let drain_deadline = async move {
        if signalled_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result.map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        }),
        _ = drain_deadline => {
            warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "In-flight requests did not finish before the shutdown timeout"
            );
            Ok(())
        }
    }
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Queue Handlers
// ============================================================================

#[instrument(skip_all)]
async fn list_queues(State(state): State<AppState>) -> Result<Json<QueueListResponse>, ApiError> {
    let result = state
        .client
        .list_queues()
        .await
        .map(|queues| Json(QueueListResponse { queues }))
        .map_err(ApiError::from);
    track(&state, "list_queues", result)
}

#[instrument(skip_all)]
async fn create_queue(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let result: Result<Response, ApiError> = async {
        let request: CreateQueueRequest = parse_json(&body)?;
        let name = QueueName::new(request.name)?;

        let mut settings = QueueSettings::default();
        if let Some(timeout) = request.visibility_timeout {
            settings = settings.with_visibility_timeout(seconds("visibility_timeout", timeout)?);
        }
        if let Some(delay) = request.delay {
            settings = settings.with_delay(seconds("delay", delay)?);
        }
        if let Some(max_size) = request.max_size {
            settings = settings.with_max_size(max_size);
        }

        let created = state.client.create_queue(&name, settings).await?;
        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        Ok((status, Json(CreateQueueResponse { name, created })).into_response())
    }
    .await;
    track(&state, "create_queue", result)
}

#[instrument(skip_all, fields(queue = %queue))]
async fn get_queue_attributes(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Response, ApiError> {
    let result: Result<Response, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let attributes = state.client.get_queue_attributes(&queue).await?;
        state.metrics.record_queue_depth(&attributes);
        Ok(Json(attributes).into_response())
    }
    .await;
    track(&state, "get_queue_attributes", result)
}

#[instrument(skip_all, fields(queue = %queue))]
async fn set_queue_attributes(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let result: Result<Response, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let request: UpdateQueueRequest = parse_json(&body)?;

        let mut update = QueueSettingsUpdate::new();
        if let Some(timeout) = request.visibility_timeout {
            update = update.visibility_timeout(seconds("visibility_timeout", timeout)?);
        }
        if let Some(delay) = request.delay {
            update = update.delay(seconds("delay", delay)?);
        }
        if let Some(max_size) = request.max_size {
            update = update.max_size(max_size);
        }

        let attributes = state.client.set_queue_attributes(&queue, update).await?;
        Ok(Json(attributes).into_response())
    }
    .await;
    track(&state, "set_queue_attributes", result)
}

#[instrument(skip_all, fields(queue = %queue))]
async fn delete_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<StatusCode, ApiError> {
    let result: Result<StatusCode, ApiError> = async {
        let queue = QueueName::new(queue)?;
        state.client.delete_queue(&queue).await?;
        state.metrics.forget_queue(queue.as_str());
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    track(&state, "delete_queue", result)
}

#[instrument(skip_all, fields(queue = %queue))]
async fn release_expired(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let result: Result<Json<ReleaseResponse>, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let released = state.client.release_expired_messages(&queue).await?;
        Ok(Json(ReleaseResponse { released }))
    }
    .await;
    track(&state, "release_expired", result)
}

// ============================================================================
// Message Handlers
// ============================================================================

#[instrument(skip_all, fields(queue = %queue))]
async fn send_message(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let result: Result<Response, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let request: SendMessageRequest = parse_json(&body)?;
        let payload = general_purpose::STANDARD
            .decode(request.body.as_bytes())
            .map_err(|e| ApiError::invalid_request(format!("body is not valid base64: {}", e)))?;

        let mut message = Message::new(Bytes::from(payload));
        if let Some(delay) = request.delay {
            message = message.with_delay(seconds("delay", delay)?);
        }

        let id = state.client.send_message(&queue, message).await?;
        state.metrics.record_message(queue.as_str(), "sent");
        Ok((StatusCode::CREATED, Json(SendMessageResponse { id })).into_response())
    }
    .await;
    track(&state, "send_message", result)
}

#[instrument(skip_all, fields(queue = %queue))]
async fn receive_message(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let result: Result<Response, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let request: ReceiveMessageRequest = if body.is_empty() {
            ReceiveMessageRequest::default()
        } else {
            parse_json(&body)?
        };
        let visibility_timeout = request
            .visibility_timeout
            .map(|timeout| seconds("visibility_timeout", timeout))
            .transpose()?;

        let received = match request.wait_seconds.filter(|wait| *wait > 0) {
            Some(wait) => {
                let max_wait = state.config.server.max_wait_seconds;
                if wait > max_wait {
                    return Err(ApiError::invalid_request(format!(
                        "wait_seconds must be at most {}, got {}",
                        max_wait, wait
                    )));
                }
                let poll_interval = i64::try_from(state.config.server.long_poll_interval_ms)
                    .map(Duration::milliseconds)
                    .unwrap_or_else(|_| Duration::seconds(1));
                receive_with_wait(
                    state.client.as_ref(),
                    &queue,
                    visibility_timeout,
                    seconds("wait_seconds", i64::try_from(wait).unwrap_or(i64::MAX))?,
                    poll_interval,
                )
                .await?
            }
            None => state.client.receive_message(&queue, visibility_timeout).await?,
        };

        Ok(match received {
            Some(message) => {
                state.metrics.record_message(queue.as_str(), "received");
                Json(message).into_response()
            }
            None => StatusCode::NO_CONTENT.into_response(),
        })
    }
    .await;
    track(&state, "receive_message", result)
}

#[instrument(skip_all, fields(queue = %queue))]
async fn pop_message(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Response, ApiError> {
    let result: Result<Response, ApiError> = async {
        let queue = QueueName::new(queue)?;
        Ok(match state.client.pop_message(&queue).await? {
            Some(message) => {
                state.metrics.record_message(queue.as_str(), "received");
                state.metrics.record_message(queue.as_str(), "deleted");
                Json(message).into_response()
            }
            None => StatusCode::NO_CONTENT.into_response(),
        })
    }
    .await;
    track(&state, "pop_message", result)
}

#[instrument(skip_all, fields(queue = %queue, message_id = %message_id))]
async fn delete_message(
    State(state): State<AppState>,
    Path((queue, message_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let result: Result<StatusCode, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let id: MessageId = message_id.parse()?;
        state.client.delete_message(&queue, &id).await?;
        state.metrics.record_message(queue.as_str(), "deleted");
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    track(&state, "delete_message", result)
}

#[instrument(skip_all, fields(queue = %queue, message_id = %message_id))]
async fn change_message_visibility(
    State(state): State<AppState>,
    Path((queue, message_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ChangeVisibilityResponse>, ApiError> {
    let result: Result<Json<ChangeVisibilityResponse>, ApiError> = async {
        let queue = QueueName::new(queue)?;
        let id: MessageId = message_id.parse()?;
        let request: ChangeVisibilityRequest = parse_json(&body)?;
        let timeout = seconds("visibility_timeout", request.visibility_timeout)?;

        let hidden_until = state
            .client
            .change_message_visibility(&queue, &id, timeout)
            .await?;
        Ok(Json(ChangeVisibilityResponse { id, hidden_until }))
    }
    .await;
    track(&state, "change_message_visibility", result)
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Store connectivity check
#[instrument(skip_all)]
async fn handle_health_check(State(state): State<AppState>) -> Response {
    let healthy = match state.client.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Health check failed");
            false
        }
    };

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        store: state.client.store_kind(),
        namespace: state.client.namespace().to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if healthy {
        Json(response).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

/// Prometheus metrics endpoint; refreshes the queue depth gauges first
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    match state.client.list_queues().await {
        Ok(queues) => {
            for queue in queues {
                match state.client.get_queue_attributes(&queue).await {
                    Ok(attributes) => state.metrics.record_queue_depth(&attributes),
                    Err(e) => warn!(queue = %queue, error = %e, "Skipping queue depth"),
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not list queues for metrics"),
    }

    state
        .metrics
        .render()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Takes the `x-correlation-id` request header or generates one, logs request
/// completion at a level matching the status and echoes the ID in the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

/// Request duration histogram
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    let response = next.run(request).await;
    state.metrics.record_http_request(start.elapsed());
    response
}

// ============================================================================
// Helpers
// ============================================================================

/// Count the outcome of an operation and pass the result through
fn track<T>(state: &AppState, operation: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    let outcome = match &result {
        Ok(_) => metrics::OUTCOME_OK,
        Err(e) => e.code(),
    };
    state.metrics.record_operation(operation, outcome);
    result
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_request(format!("malformed JSON body: {}", e)))
}

/// Whole seconds from a request field
fn seconds(field: &str, value: i64) -> Result<Duration, ApiError> {
    Duration::try_seconds(value)
        .ok_or_else(|| ApiError::invalid_request(format!("{} is out of range", field)))
}
