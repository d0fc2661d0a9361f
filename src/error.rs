use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the rotator
#[derive(Error, Debug)]
pub enum RotatorError {
    // Store errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Candidate source errors
    #[error("Candidate source {source_name} unreadable: {reason}")]
    SourceUnreadable { source_name: String, reason: String },

    #[error("Candidate source {source_name} malformed: {reason}")]
    SourceMalformed { source_name: String, reason: String },

    /// Non-fatal condition for a single candidate or stored identity.
    #[error("Record {key} skipped: {reason}")]
    RecordSkipped { key: String, reason: String },

    // Pool errors
    #[error("No proxies available")]
    PoolEmpty,

    #[error("Proxy {address} has no resolved endpoint")]
    Unresolved { address: String },

    // Forwarding errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for rotator operations
pub type Result<T> = std::result::Result<T, RotatorError>;

impl RotatorError {
    /// Wrap a store transport failure
    pub fn store(err: impl std::fmt::Display) -> Self {
        RotatorError::StoreUnavailable(err.to_string())
    }

    /// Build a per-record skip condition
    pub fn skipped(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RotatorError::RecordSkipped {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RotatorError::InvalidRequest(_)
            | RotatorError::SourceMalformed { .. }
            | RotatorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 422 Unprocessable Entity
            RotatorError::RecordSkipped { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 502 Bad Gateway
            RotatorError::ProxyConnectionFailed(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RotatorError::PoolEmpty
            | RotatorError::StoreUnavailable(_)
            | RotatorError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            RotatorError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            RotatorError::Database(_)
            | RotatorError::SourceUnreadable { .. }
            | RotatorError::Unresolved { .. }
            | RotatorError::Io(_)
            | RotatorError::Http(_)
            | RotatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RotatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for RotatorError {
    fn from(err: hyper::Error) -> Self {
        RotatorError::Http(err.to_string())
    }
}
