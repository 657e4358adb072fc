//! Step error classification

use serde::{Deserialize, Serialize};

/// Why a step attempt failed
///
/// - `Permanent`: never retried (4xx, malformed input, invalid config)
/// - `Transient`: retried with backoff until the policy gives up (timeouts, 5xx, rate limits)
/// - `Unexpected`: not classified by the step; not retried, raised as an operator alert
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StepError {
    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Permanent,
    Transient,
    Unexpected,
}

impl StepError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn kind(&self) -> StepErrorKind {
        match self {
            Self::Permanent(_) => StepErrorKind::Permanent,
            Self::Transient(_) => StepErrorKind::Transient,
            Self::Unexpected(_) => StepErrorKind::Unexpected,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Permanent(m) | Self::Transient(m) | Self::Unexpected(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors that reach a step through `?` without classification are unexpected.
impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unexpected(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unexpected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StepError::transient("503").is_retryable());
        assert!(!StepError::permanent("404").is_retryable());
        assert!(!StepError::unexpected("panic").is_retryable());
        assert_eq!(StepError::permanent("x").kind(), StepErrorKind::Permanent);
    }

    #[test]
    fn test_anyhow_is_unexpected() {
        let err: StepError = anyhow::anyhow!("no idea").into();
        assert_eq!(err, StepError::unexpected("no idea"));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(StepError::transient("timeout")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "transient", "message": "timeout"}));
    }
}
