//! Error taxonomy shared by every tunebridge component.
//!
//! Callers only ever see one of these variants. Provider-level detail is
//! carried as a message or as the boxed source of
//! [`Error::AllProvidersExhausted`], never as a separate public type.

/// Common error type for tunebridge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A provider is disabled or missing, or a configuration field is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request was rejected before any network call (empty id, keyword...).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Timeout, connection failure, 5xx or 429. Retried by the transport.
    #[error("Transient network error: {message}")]
    TransientNetwork {
        message: String,
        status: Option<u16>,
    },

    /// The upstream answered with something unusable (4xx, undecodable body).
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider understood the request but has no result.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Every eligible provider failed; wraps the last underlying error.
    #[error("All {attempted} providers failed")]
    AllProvidersExhausted {
        attempted: usize,
        #[source]
        last: Box<Error>,
    },

    /// The admission controller rejected the call.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The request context was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The request context deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Create a new Configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new Validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new TransientNetwork error without an HTTP status.
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::TransientNetwork {
            message: msg.into(),
            status: None,
        }
    }

    /// Create a new TransientNetwork error for a retryable HTTP status.
    pub fn transient_status<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::TransientNetwork {
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create a new Provider error.
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new RateLimited error.
    pub fn rate_limited<S: Into<String>>(key: S) -> Self {
        Self::RateLimited(key.into())
    }

    /// Wrap the last provider failure after a full fallback traversal.
    pub fn exhausted(attempted: usize, last: Error) -> Self {
        Self::AllProvidersExhausted {
            attempted,
            last: Box::new(last),
        }
    }

    /// Whether the transport should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// Whether the error comes from the request context rather than the work.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
