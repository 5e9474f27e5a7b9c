//! # Error Handling
//!
//! Two error families live here:
//!
//! - **`AppError`**: what the HTTP surface returns. Implements actix's
//!   `ResponseError`, so handlers can just use `?` and the client gets a JSON
//!   error envelope with the right status code.
//! - **`RelayError`**: what the session core returns. These never leave a
//!   session except through the administrative force-stop path, where a
//!   `NotFound` becomes a 404.
//!
//! ## Propagation policy:
//! Failures local to one session stay inside that session. Teardown
//! operations (socket close, final notifications) never return errors at all;
//! they log and carry on so that both legs are always released.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors surfaced to HTTP callers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Session not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the caller's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Session core errors reaching the HTTP surface.
///
/// Only `NotFound` is expected here in practice (force-stop on an unknown id);
/// everything else is reported as an internal error.
impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(_) => AppError::NotFound("Session not found".to_string()),
            RelayError::MalformedMessage(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Type alias for Results that use the HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

/// Errors produced by the relay session core.
///
/// ## Taxonomy:
/// - **Connect**: the remote leg is unreachable or rejected the credentials
/// - **Handshake**: session creation failed; the client was told and closed
/// - **TransientSend**: the remote leg dropped mid-session; recovered by one
///   reconnect-and-retry, otherwise the audio chunk is dropped
/// - **MalformedMessage**: a client message could not be used; dropped
/// - **DuplicateSession**: registry already holds the identifier
/// - **NotFound**: no session with that identifier
/// - **Closed**: the leg being written to is already gone
///
/// Concurrent termination is deliberately absent: losing a termination race
/// is not an error, the late caller just observes the session already closed.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    Connect(String),
    Handshake(String),
    TransientSend(String),
    MalformedMessage(String),
    DuplicateSession(String),
    NotFound(String),
    Closed(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Connect(msg) => write!(f, "Remote connect failed: {}", msg),
            RelayError::Handshake(msg) => write!(f, "Session handshake failed: {}", msg),
            RelayError::TransientSend(msg) => write!(f, "Remote send failed: {}", msg),
            RelayError::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            RelayError::DuplicateSession(id) => write!(f, "Session '{}' already registered", id),
            RelayError::NotFound(id) => write!(f, "Session '{}' not found", id),
            RelayError::Closed(msg) => write!(f, "Link closed: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::MalformedMessage(err.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
