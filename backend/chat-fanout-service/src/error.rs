use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Service-level errors surfaced at startup or through HTTP handlers.
#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::StartServer(_) => "start_failure",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Internal => "internal_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.error_code(),
            "message": self.to_string(),
        }))
    }
}

/// Per-message and per-connection failures of the fan-out pipeline.
///
/// None of these may escape the connection (or the single message) that
/// produced them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FanoutError {
    /// `@` prefix without a following space.
    #[error("malformed directed message target: {0:?}")]
    MalformedTarget(String),

    #[error("publish to broker channel {channel} failed: {reason}")]
    PublishFailure { channel: String, reason: String },

    #[error("delivery to connection failed: {0}")]
    DeliveryFailure(String),

    #[error("broker payload could not be decoded: {0}")]
    DecodeFailure(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no session registered for connection {0}")]
    NotFound(String),

    #[error("broker error: {0}")]
    Broker(String),
}

impl From<redis::RedisError> for FanoutError {
    fn from(e: redis::RedisError) -> Self {
        FanoutError::Broker(e.to_string())
    }
}

impl From<FanoutError> for AppError {
    fn from(e: FanoutError) -> Self {
        match e {
            FanoutError::Broker(reason) => AppError::ServiceUnavailable(reason),
            other => {
                tracing::error!(error = %other, "fan-out failure reached an HTTP handler");
                AppError::Internal
            }
        }
    }
}
