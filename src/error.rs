use crate::ValidationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

/// Failure anywhere between browser launch and encoded bytes
///
/// The variant is for server-side logs and metrics only. Callers of the HTTP
/// API always receive the same opaque message.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Image encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Semaphore acquire error: {0}")]
    SemaphoreError(String),
}

impl RenderError {
    /// Pipeline stage the failure happened in, used as a metrics label
    pub fn stage(&self) -> &'static str {
        match self {
            RenderError::BrowserLaunchFailed(_) => "launch",
            RenderError::PageError(_) | RenderError::SemaphoreError(_) => "page",
            RenderError::NavigationFailed(_) | RenderError::NavigationTimeout(_) => "navigation",
            RenderError::CaptureFailed(_) => "capture",
            RenderError::EncodeFailed(_) => "encode",
        }
    }
}

impl From<AcquireError> for RenderError {
    fn from(err: AcquireError) -> Self {
        RenderError::SemaphoreError(err.to_string())
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        RenderError::EncodeFailed(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the screenshot endpoint can answer with besides an image
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid query parameters")]
    Validation(ValidationError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Failed to generate screenshot")]
    Render(RenderError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent to the caller. Render causes are never included.
    pub fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Validation(err) => json!({
                "message": "Invalid query parameters",
                "error": err,
            }),
            ApiError::Unauthorized => json!({ "message": "Unauthorized" }),
            ApiError::Render(_) => json!({ "error": "Failed to generate screenshot" }),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        ApiError::Render(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
