//! Error types for the astrochat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] wraps them all.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The top-level error type for all astrochat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The text shown to end users for any failed provider call.
pub const USER_FACING_FAILURE: &str = "Could not get a response, please try again.";

// --- Provider errors ---

/// The shared failure taxonomy every provider adapter maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Endpoint missing, unparseable, or not found (404).
    InvalidEndpoint,
    /// Missing or rejected credentials (401/403).
    Unauthorized,
    /// Provider throttled the request (429).
    RateLimited,
    /// The hosted model is cold-starting.
    ModelLoading,
    /// Any other non-2xx status.
    Http(u16),
    /// Empty body, or no content in an otherwise valid response.
    EmptyResponse,
    /// Body could not be decoded into the expected shape.
    MalformedResponse,
    /// Connection-level failure before a response arrived.
    Network,
    /// The call exceeded its deadline.
    Timeout,
    /// The caller cancelled the call.
    Cancelled,
    /// The request cannot be sent as built (e.g. a zero token limit).
    InvalidRequest,
}

impl ErrorKind {
    /// Transient kinds are expected to resolve after a delay and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ModelLoading | Self::Network | Self::Timeout
        )
    }

    /// Short stable label, used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint => "invalid_endpoint",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::ModelLoading => "model_loading",
            Self::Http(_) => "http_error",
            Self::EmptyResponse => "empty_response",
            Self::MalformedResponse => "malformed_response",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "HTTP error (status {status})"),
            Self::InvalidEndpoint => f.write_str("invalid endpoint"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::ModelLoading => f.write_str("model is loading"),
            Self::EmptyResponse => f.write_str("empty response"),
            Self::MalformedResponse => f.write_str("malformed response"),
            Self::Network => f.write_str("network error"),
            Self::Timeout => f.write_str("request timed out"),
            Self::Cancelled => f.write_str("request cancelled"),
            Self::InvalidRequest => f.write_str("invalid request"),
        }
    }
}

/// A classified provider failure.
///
/// Carries the [`ErrorKind`], the HTTP status when one was received, the
/// provider's own error message, and the underlying cause if any. Never shown
/// to end users directly: see [`ProviderError::user_message`].
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub provider_message: Option<String>,
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    /// Server-suggested delay before retrying, in seconds.
    pub retry_after_secs: Option<u64>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            http_status: None,
            provider_message: None,
            cause: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.provider_message = Some(message.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// The only text that should ever reach an end user.
    pub fn user_message(&self) -> &'static str {
        USER_FACING_FAILURE
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.provider_message, &self.cause) {
            (Some(msg), _) => write!(f, ": {msg}"),
            (None, Some(cause)) => write!(f, ": {cause}"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for ProviderError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.http_status == other.http_status
            && self.provider_message == other.provider_message
    }
}

// --- Conversation store errors ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Refusing to persist a turn with empty content")]
    EmptyContent,

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}
