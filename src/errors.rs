//! Error taxonomy for the gateway core and its single mapping to HTTP.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Failures the core reports upward. Every variant carries the key and/or
/// operation so the boundary can log and respond without re-deriving them.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("object `{key}` not found")]
    NotFound { key: String },

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("upload of `{key}` failed: {source}")]
    UploadFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("signing `{key}` failed: {source}")]
    Signing {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("store `{op}` failed for `{key}`: {source}")]
    StoreUnavailable {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl GatewayError {
    /// Classify a store failure for `op` on `key`. Not-found and bad keys
    /// keep their own kinds; everything else is a store outage.
    pub fn from_store(op: &'static str, key: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => GatewayError::NotFound { key },
            StoreError::InvalidKey(key) => {
                GatewayError::InvalidInput(format!("invalid object key `{}`", key))
            }
            source => GatewayError::StoreUnavailable {
                op,
                key: key.to_string(),
                source,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UploadFailed { .. }
            | GatewayError::Signing { .. }
            | GatewayError::StoreUnavailable { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "INVALID_INPUT",
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::SizeLimitExceeded { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::UploadFailed { .. } => "UPLOAD_FAILED",
            GatewayError::Signing { .. } => "SIGNING_FAILED",
            GatewayError::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// The HTTP-facing error. Built from [`GatewayError`] in one place so no
/// handler picks its own status codes for core failures.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": self.message,
            "status": self.status.as_u16(),
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (self.status, body).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let status = err.status();
        let message = if status.is_server_error() {
            tracing::error!("{}", err);
            "The storage backend could not complete the request".to_string()
        } else {
            tracing::debug!("rejecting request: {}", err);
            err.to_string()
        };
        AppError::new(status, err.code(), message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("unexpected error: {:#}", err);
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An unexpected error occurred",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_keeps_its_kind() {
        let err = GatewayError::from_store(
            "stat",
            "a.txt",
            StoreError::NotFound {
                key: "a.txt".into(),
            },
        );
        assert!(matches!(err, GatewayError::NotFound { ref key } if key == "a.txt"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn other_store_failures_become_unavailable_with_context() {
        let err = GatewayError::from_store(
            "delete",
            "a.txt",
            StoreError::Status {
                op: "delete",
                status: 503,
            },
        );
        assert!(matches!(
            err,
            GatewayError::StoreUnavailable { op: "delete", ref key, .. } if key == "a.txt"
        ));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn server_errors_do_not_leak_details() {
        let app: AppError = GatewayError::UploadFailed {
            key: "secret/path.txt".into(),
            source: StoreError::Status {
                op: "put",
                status: 500,
            },
        }
        .into();
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert_eq!(app.code, "UPLOAD_FAILED");
        assert!(!app.message.contains("secret"));
    }

    #[test]
    fn client_errors_keep_their_message() {
        let app: AppError = GatewayError::SizeLimitExceeded {
            size: 10,
            limit: 5,
        }
        .into();
        assert_eq!(app.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.message.contains("10 bytes"));
    }
}
