//! Tests for HTTP error mapping.

use super::*;
use axum::body::to_bytes;

async fn body_of(response: Response) -> ErrorBody {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn test_status_codes() {
    let cases = vec![
        (
            ApiError::from(QueueError::QueueNotFound {
                queue_name: "q".to_string(),
            }),
            StatusCode::NOT_FOUND,
            "queue_not_found",
        ),
        (
            ApiError::from(QueueError::MessageNotFound {
                message_id: "id".to_string(),
            }),
            StatusCode::NOT_FOUND,
            "message_not_found",
        ),
        (
            ApiError::from(QueueError::MessageTooLarge {
                size: 2048,
                max_size: 1024,
            }),
            StatusCode::PAYLOAD_TOO_LARGE,
            "message_too_large",
        ),
        (
            ApiError::from(QueueError::InvalidConfig {
                message: "vt".to_string(),
            }),
            StatusCode::BAD_REQUEST,
            "invalid_config",
        ),
        (
            ApiError::from(ValidationError::Required {
                field: "queue_name".to_string(),
            }),
            StatusCode::BAD_REQUEST,
            "invalid_request",
        ),
        (
            ApiError::invalid_request("bad json"),
            StatusCode::BAD_REQUEST,
            "invalid_request",
        ),
        (
            ApiError::from(QueueError::StoreUnavailable {
                message: "refused".to_string(),
            }),
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
        ),
        (
            ApiError::from(QueueError::StoreFailure {
                message: "garbled".to_string(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_failure",
        ),
    ];

    for (error, status, code) in cases {
        assert_eq!(error.status(), status, "status of {:?}", error);
        assert_eq!(error.code(), code, "code of {:?}", error);
    }
}

#[tokio::test]
async fn test_unavailable_store_carries_retry_after() {
    let error = ApiError::from(QueueError::StoreUnavailable {
        message: "connection refused".to_string(),
    });

    let response = error.into_response();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap(),
        "1"
    );
    let body = body_of(response).await;
    assert_eq!(body.error, "store_unavailable");
    assert!(body.message.contains("connection refused"));
}

#[tokio::test]
async fn test_not_found_body() {
    let error = ApiError::from(QueueError::QueueNotFound {
        queue_name: "orders".to_string(),
    });

    let response = error.into_response();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(header::RETRY_AFTER).is_none());
    let body = body_of(response).await;
    assert_eq!(
        body,
        ErrorBody {
            error: "queue_not_found".to_string(),
            message: "Queue not found: orders".to_string(),
        }
    );
}

#[tokio::test]
async fn test_internal_errors_are_not_leaked() {
    let error = ApiError::from(QueueError::StoreFailure {
        message: "secret internals".to_string(),
    });

    let body = body_of(error.into_response()).await;

    assert_eq!(body.error, "store_failure");
    assert!(!body.message.contains("secret internals"));
}
