//! Error handling for the proofport service
//!
//! All fallible operations in the crate return [`Result`]. Error kinds map
//! deterministically onto JSON-RPC error codes and HTTP statuses so the
//! protocol adapters can stay thin: an adapter converts a [`ProofportError`]
//! with [`ProofportError::rpc_code`] / [`ProofportError::http_status`] and
//! never inspects variants itself.
//!
//! Business-rule outcomes that callers must handle (an on-chain verifier
//! revert, a failed attestation check) are *not* errors; they are carried in
//! the corresponding result records.

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for proofport operations
pub type Result<T> = std::result::Result<T, ProofportError>;

/// JSON-RPC error code for invalid params
pub const RPC_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code for internal errors
pub const RPC_INTERNAL: i64 = -32603;
/// JSON-RPC error code for an unknown task/session/proof id
pub const RPC_NOT_FOUND: i64 = -32001;
/// JSON-RPC error code for a rejected status transition
pub const RPC_INVALID_TRANSITION: i64 = -32002;

/// Error type for the proofport service
#[derive(Error, Debug)]
pub enum ProofportError {
    /// Caller violated a documented precondition
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Session, task or proof id unknown or expired
    #[error("not found: {0}")]
    NotFound(String),

    /// Status mutation rejected by the valid-transition table
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// Sliding-window rate limit exceeded
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest arrival leaves the window
        retry_after_secs: u64,
    },

    /// A required external dependency could not be reached
    #[error("dependency unreachable: {0}")]
    Dependency(String),

    /// KV store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error (startup or runtime)
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all internal error; details are logged, not leaked
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Redis error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl ProofportError {
    /// Create an invalid-params error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid-transition error
    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    /// Create a dependency error
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidParams(_) => RPC_INVALID_PARAMS,
            Self::NotFound(_) => RPC_NOT_FOUND,
            Self::InvalidTransition(_) => RPC_INVALID_TRANSITION,
            _ => RPC_INTERNAL,
        }
    }

    /// HTTP status for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidParams(_) | Self::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Dependency(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable retry hint, set only for rate limiting
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl axum::response::IntoResponse for ProofportError {
    fn into_response(self) -> axum::response::Response {
        let mut body = serde_json::json!({ "error": self.to_string() });
        if let Some(retry_after) = self.retry_after() {
            body["retryAfter"] = serde_json::json!(retry_after);
        }
        (self.http_status(), axum::Json(body)).into_response()
    }
}
