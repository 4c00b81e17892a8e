//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

/// Message returned to publishers that send an empty or unreadable form.
pub const INVALID_VALUE: &str = "invalid value";

/// Message returned to listeners whose connection cannot stream.
pub const STREAMING_UNSUPPORTED: &str = "streaming is not supported";

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the broadcaster
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Publish request was missing its message
    #[error("Bad request: {INVALID_VALUE}")]
    InvalidValue,

    /// The connection cannot be flushed incrementally
    #[error("Streaming unsupported for {0:?}")]
    StreamingUnsupported(http::Version),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body
///
/// Every error leaves the service in the same `{"message": ...}` envelope
/// publishers already parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Error {
    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidValue => StatusCode::BAD_REQUEST,
            Error::Config(_)
            | Error::InvalidConfig(_)
            | Error::Io(_)
            | Error::StreamingUnsupported(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Error::InvalidValue => ErrorResponse::new(INVALID_VALUE),
            Error::StreamingUnsupported(version) => {
                tracing::warn!(?version, "rejecting stream listener");
                ErrorResponse::new(STREAMING_UNSUPPORTED)
            }
            other => {
                tracing::error!("{}", other);
                ErrorResponse::new("internal server error")
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Convert a handler panic caught by `CatchPanicLayer` into a 500 envelope
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    Error::Internal(format!("handler panicked: {}", detail)).into_response()
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("invalid value");
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"message":"invalid value"}"#
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::InvalidValue.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::StreamingUnsupported(http::Version::HTTP_10).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_invalid_value_body() {
        let response = Error::InvalidValue.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"message":"invalid value"}"#);
    }

    #[tokio::test]
    async fn test_internal_details_not_exposed() {
        let response = Error::Internal("database password leaked".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.message, "internal server error");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        use axum::{body::Body, http::Request, routing::get, Router};
        use tower::ServiceExt;
        use tower_http::catch_panic::CatchPanicLayer;

        let app = Router::new()
            .route("/boom", get(|| async { panic!("handler blew up") as () }))
            .layer(CatchPanicLayer::custom(panic_response));

        let request = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.message, "internal server error");
    }
}
