// Error types for NeoFeed collaborators
//
// Each collaborator error knows whether retrying can help. The `From`
// conversions into `StepError` are what workflow steps rely on: `?` on a
// collaborator call inside a step yields a correctly classified failure.

use neofeed_durable::StepError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// FetchError
// ============================================================================

/// Errors from fetching a URL or a subscription source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Malformed URL, 4xx response, unsupported content. Never retried.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),

    /// Timeout, 5xx response, connection reset. Retried with backoff.
    #[error("transient fetch failure: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Classify an HTTP status code. Only call for non-success statuses.
    pub fn from_status(status: u16, url: &str) -> Self {
        if (400..500).contains(&status) && status != 408 && status != 429 {
            Self::Permanent(format!("{url} returned HTTP {status}"))
        } else {
            Self::Transient(format!("{url} returned HTTP {status}"))
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl From<FetchError> for StepError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Permanent(msg) => StepError::Permanent(msg),
            FetchError::Transient(msg) => StepError::Transient(msg),
        }
    }
}

// ============================================================================
// SummarizeError
// ============================================================================

/// Errors from the summarization collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummarizeError {
    /// Provider unreachable, rate limited or returned 5xx
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),

    /// The provider answered but the answer could not be used
    #[error("invalid summarizer response: {0}")]
    InvalidResponse(String),

    /// Missing API key, rejected credentials, unknown model
    #[error("summarizer configuration error: {0}")]
    Configuration(String),
}

impl From<SummarizeError> for StepError {
    fn from(err: SummarizeError) -> Self {
        match err {
            SummarizeError::Configuration(_) => StepError::Permanent(err.to_string()),
            SummarizeError::Unavailable(_) | SummarizeError::InvalidResponse(_) => {
                StepError::Transient(err.to_string())
            }
        }
    }
}

// ============================================================================
// DeliveryError
// ============================================================================

/// Errors from delivering a rendered report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Rejected by the channel (bad address, 4xx). Never retried.
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// Channel temporarily unavailable
    #[error("delivery failed: {0}")]
    Unavailable(String),

    /// Sender is not configured for this channel
    #[error("delivery not configured: {0}")]
    NotConfigured(String),
}

impl DeliveryError {
    pub fn from_status(status: u16, body: &str) -> Self {
        if (400..500).contains(&status) && status != 408 && status != 429 {
            Self::Rejected(format!("HTTP {status}: {body}"))
        } else {
            Self::Unavailable(format!("HTTP {status}: {body}"))
        }
    }
}

impl From<DeliveryError> for StepError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Unavailable(_) => StepError::Transient(err.to_string()),
            DeliveryError::Rejected(_) | DeliveryError::NotConfigured(_) => {
                StepError::Permanent(err.to_string())
            }
        }
    }
}

// ============================================================================
// StorageError
// ============================================================================

/// Errors from the domain stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn user_not_found(user_id: Uuid) -> Self {
        Self::not_found("user", user_id)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}

impl From<StorageError> for StepError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => StepError::Permanent(err.to_string()),
            StorageError::Database(_) => StepError::Transient(err.to_string()),
            StorageError::Serialization(_) => StepError::Unexpected(err.to_string()),
        }
    }
}
