//! Error handling for the shelfwatch server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Both camera roles would resolve to the same capture device
    #[error("Device conflict: {0}")]
    DeviceConflict(String),

    /// Fewer than two capture devices are available
    #[error("Insufficient devices: found {found}, need 2")]
    InsufficientDevices { found: usize },

    /// A capture window saw too few distinct labels to be trusted
    #[error("Insufficient detections: saw {seen} distinct labels, need at least {min} - redo the capture")]
    InsufficientDetections { seen: usize, min: usize },

    /// AFTER snapshot grew past the plausible bound; the read is unreliable
    #[error("Unexpected growth: after has {after} labels vs {before} before - redo the capture")]
    UnexpectedGrowth { before: usize, after: usize },

    /// Commit attempted without both an identity and a non-empty removed set
    #[error("Incomplete candidate: {0}")]
    IncompleteCandidate(String),

    /// Vision Provider call exceeded its deadline
    #[error("Vision provider timeout: {0}")]
    VisionTimeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Inventory Store error
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::DeviceConflict(msg) => (StatusCode::CONFLICT, "DEVICE_CONFLICT", msg.clone()),
            Error::InsufficientDevices { .. } => (
                StatusCode::CONFLICT,
                "INSUFFICIENT_DEVICES",
                self.to_string(),
            ),
            Error::InsufficientDetections { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_DETECTIONS",
                self.to_string(),
            ),
            Error::UnexpectedGrowth { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNEXPECTED_GROWTH",
                self.to_string(),
            ),
            Error::IncompleteCandidate(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INCOMPLETE_CANDIDATE",
                msg.clone(),
            ),
            Error::VisionTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, "VISION_TIMEOUT", msg.clone())
            }
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Inventory(msg) => (StatusCode::BAD_GATEWAY, "INVENTORY_ERROR", msg.clone()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

impl Error {
    /// True for rejections that ask the operator to redo a capture
    /// rather than signalling a fault in the service itself.
    pub fn is_retryable_capture(&self) -> bool {
        matches!(
            self,
            Error::InsufficientDetections { .. } | Error::UnexpectedGrowth { .. }
        )
    }
}
