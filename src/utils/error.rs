/*
 * Comprehensive error handling system with structured error codes, HTTP status mapping, and the wire envelope.
 * I'm implementing a single tagged error enum so every failure path surfaces a stable machine-readable code while keeping internals out of responses.
 */

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Custom Result type for consistent error handling throughout the application
/// I'm providing a convenient alias that reduces boilerplate and ensures consistency
pub type Result<T> = std::result::Result<T, AppError>;

/// Main application error enum covering all failure scenarios the service can hit
/// I'm organizing variants by the wire code they propagate so handlers never invent status codes ad hoc
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request format: {message}")]
    InvalidRequestFormat {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Invalid verse reference: {0}")]
    InvalidVerseReference(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String, retry_after: u64 },

    #[error("Content blocked: {0}")]
    ContentBlocked(String),

    #[error("Model inference failed: {0}")]
    ModelInferenceFailed(String),

    #[error("AI service timeout: {0}")]
    AiServiceTimeout(String),

    #[error("Storage read failed: {0}")]
    StorageReadFailed(String),

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("Database query failed: {0}")]
    DatabaseQueryFailed(String),

    #[error("Cache operation failed: {0}")]
    CacheError(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

/// Wire-level error envelope matching what clients parse
/// I'm keeping requestId mandatory so client logs can always be joined to server logs
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Create an invalid-request error without structured details
    pub fn invalid_request<T: Into<String>>(message: T) -> Self {
        Self::InvalidRequestFormat {
            message: message.into(),
            details: None,
        }
    }

    /// Create an invalid-request error carrying the accumulated validation errors
    pub fn invalid_request_with_details<T: Into<String>>(
        message: T,
        details: serde_json::Value,
    ) -> Self {
        Self::InvalidRequestFormat {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::InternalServerError(message.into())
    }

    /// Get the stable machine-readable code carried in the envelope
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequestFormat { .. } => "invalid_request_format",
            AppError::MissingRequiredField(_) => "missing_required_field",
            AppError::InvalidVerseReference(_) => "invalid_verse_reference",
            AppError::NotFound(_) => "resource_not_found",
            AppError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AppError::ContentBlocked(_) => "content_blocked",
            AppError::ModelInferenceFailed(_) => "model_inference_failed",
            AppError::AiServiceTimeout(_) => "ai_service_timeout",
            AppError::StorageReadFailed(_) => "storage_read_failed",
            AppError::StorageWriteFailed(_) => "storage_write_failed",
            AppError::DatabaseQueryFailed(_) => "database_query_failed",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Cancelled => "request_cancelled",
            // Cache failures are never user-visible on the happy paths; if one
            // escapes this far it is reported as an internal fault.
            AppError::CacheError(_)
            | AppError::ConfigurationError(_)
            | AppError::InternalServerError(_) => "internal_server_error",
        }
    }

    /// Map the error to its HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequestFormat { .. }
            | AppError::MissingRequiredField(_)
            | AppError::InvalidVerseReference(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ContentBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ModelInferenceFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::AiServiceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            AppError::StorageReadFailed(_)
            | AppError::StorageWriteFailed(_)
            | AppError::DatabaseQueryFailed(_)
            | AppError::CacheError(_)
            | AppError::ConfigurationError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds the client should wait before retrying, set only on 429
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            // A window can reset at the instant of the check, so the value is
            // floored to one second.
            AppError::RateLimitExceeded { retry_after, .. } => Some((*retry_after).max(1)),
            _ => None,
        }
    }

    /// User-facing message; internals stay in the logs, not on the wire
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidRequestFormat { message, .. } => message.clone(),
            AppError::MissingRequiredField(field) => format!("Missing required field: {}", field),
            AppError::InvalidVerseReference(msg) => msg.clone(),
            AppError::NotFound(resource) => format!("Resource not found: {}", resource),
            AppError::RateLimitExceeded { message, .. } => message.clone(),
            AppError::ContentBlocked(msg) => msg.clone(),
            AppError::ModelInferenceFailed(_) => {
                "Image generation failed. Please try again.".to_string()
            }
            AppError::AiServiceTimeout(_) => {
                "Image generation timed out. Please try again.".to_string()
            }
            AppError::Unauthorized(_) => "Authentication required.".to_string(),
            AppError::Forbidden(_) => {
                "You don't have permission to access this resource.".to_string()
            }
            AppError::Cancelled => "Request cancelled by the client.".to_string(),
            AppError::StorageReadFailed(_) | AppError::StorageWriteFailed(_) => {
                "Storage is temporarily unavailable. Please try again later.".to_string()
            }
            AppError::DatabaseQueryFailed(_)
            | AppError::CacheError(_)
            | AppError::ConfigurationError(_)
            | AppError::InternalServerError(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }

    /// Structured details for the envelope (accumulated validation errors)
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::InvalidRequestFormat { details, .. } => details.clone(),
            _ => None,
        }
    }

    /// Build the wire envelope for a known request id
    pub fn to_envelope(&self, request_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.user_message(),
                request_id: request_id.to_string(),
                details: self.details(),
                retry_after: self.retry_after(),
            },
        }
    }

    /// Convert to an HTTP response carrying the envelope and, on 429, Retry-After
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let status = self.status_code();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
                error!(request_id = %request_id, code = self.code(), "{}", self);
            }
            _ => {
                warn!(request_id = %request_id, code = self.code(), "{}", self);
            }
        }

        let retry_after = self.retry_after();
        let envelope = self.to_envelope(request_id);
        let mut response = (status, Json(envelope)).into_response();

        if let Some(seconds) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Implementation of IntoResponse for automatic error conversion in route handlers
/// I'm generating a request id here so the envelope is always joinable to server logs even when the handler bailed before reading one
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.into_response_with_id(&request_id)
    }
}

/// Conversion from sqlx::Error preserving the not-found distinction
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("database record".to_string()),
            sqlx::Error::Database(db_err) => {
                AppError::DatabaseQueryFailed(format!("database operation failed: {}", db_err))
            }
            sqlx::Error::PoolTimedOut => {
                AppError::DatabaseQueryFailed("database connection pool timeout".to_string())
            }
            _ => AppError::DatabaseQueryFailed(format!("database error: {}", err)),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError(format!("redis error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::AiServiceTimeout(format!("upstream request timeout: {}", err))
        } else {
            AppError::ModelInferenceFailed(format!("upstream request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::NotFound("image".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::invalid_request("bad body").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ContentBlocked("unsafe".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::AiServiceTimeout("30s".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::ModelInferenceFailed("empty body".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(
            AppError::InvalidVerseReference("x".to_string()).code(),
            "invalid_verse_reference"
        );
        assert_eq!(
            AppError::DatabaseQueryFailed("x".to_string()).code(),
            "database_query_failed"
        );
        assert_eq!(
            AppError::RateLimitExceeded {
                message: "slow down".to_string(),
                retry_after: 42,
            }
            .code(),
            "rate_limit_exceeded"
        );
    }

    #[test]
    fn test_retry_after_floored_to_one() {
        let err = AppError::RateLimitExceeded {
            message: "limit".to_string(),
            retry_after: 0,
        };
        assert_eq!(err.retry_after(), Some(1));
    }

    #[test]
    fn test_envelope_shape() {
        let err = AppError::RateLimitExceeded {
            message: "limit reached".to_string(),
            retry_after: 120,
        };
        let envelope = err.to_envelope("req-1");
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["error"]["code"], "rate_limit_exceeded");
        assert_eq!(json["error"]["requestId"], "req-1");
        assert_eq!(json["error"]["retryAfter"], 120);
    }

    #[test]
    fn test_cache_errors_surface_as_internal() {
        let err = AppError::CacheError("redis gone".to_string());
        assert_eq!(err.code(), "internal_server_error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
