//! API error types and HTTP response conversion
//!
//! Component errors map onto statuses here: unknown IDs are 404, state
//! conflicts 409, malformed values 422, bad query or topic parameters 400.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use realtime::{OutboundMessage, RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{BridgeError, GateError};

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

impl ApiErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InternalError(_) => "InternalError",
        }
    }

    /// The same error as a WebSocket error frame
    pub fn to_frame(&self) -> OutboundMessage {
        OutboundMessage::error(self.to_string(), Some(self.code()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse::new(self.error_type(), self.to_string(), self.code());

        if status.is_server_error() {
            tracing::error!("API error: {:?}", body);
        } else {
            tracing::debug!("API error: {:?}", body);
        }

        (status, Json(body)).into_response()
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        let message = err.to_string();
        match err {
            GateError::NotFound(_) => ApiError::NotFound(message),
            GateError::InvalidState { .. } | GateError::AlreadyWaiting(_) => {
                ApiError::Conflict(message)
            }
            GateError::InvalidArgument(_) => ApiError::ValidationError(message),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let message = err.to_string();
        match err {
            BridgeError::NotFound(_) => ApiError::NotFound(message),
            BridgeError::SessionExists(_) | BridgeError::SessionClosed(_) => {
                ApiError::Conflict(message)
            }
            BridgeError::RuntimeUnavailable | BridgeError::Classifier(_) => {
                ApiError::InternalError(message)
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::SubscriberConflict { .. } => ApiError::Conflict(message),
            RegistryError::InvalidTopicType(_) | RegistryError::InvalidSubscription(_) => {
                ApiError::BadRequest(message)
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
