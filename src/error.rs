use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No usable capture device found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device [{device}]: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("Frame read failed: {0}")]
    ReadFailure(String),

    #[error("Video device lost [{device}]: {reason}")]
    DeviceLost { device: String, reason: String },

    #[error("Capture session already released")]
    SessionReleased,

    #[error("Frame encode failed: {0}")]
    EncodeFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    /// Whether the capture session can no longer produce frames.
    ///
    /// Transient read and encode failures are absorbed by the stream pump;
    /// these end it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::DeviceLost { .. } | AppError::SessionReleased)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            AppError::DeviceNotFound(_)
            | AppError::DeviceOpen { .. }
            | AppError::ReadFailure(_)
            | AppError::DeviceLost { .. }
            | AppError::SessionReleased
            | AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::EncodeFailure(_) | AppError::Io(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::warn!(
            status = status.as_u16(),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::SessionReleased.is_fatal());
        assert!(AppError::DeviceLost {
            device: "/dev/video0".to_string(),
            reason: "ENODEV".to_string(),
        }
        .is_fatal());
        assert!(!AppError::ReadFailure("timeout".to_string()).is_fatal());
        assert!(!AppError::EncodeFailure("bad frame".to_string()).is_fatal());
    }

    #[test]
    fn test_status_mapping() {
        let resp = AppError::ReadFailure("timeout".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = AppError::EncodeFailure("oops".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
