//! Workflow trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::{StepContext, StepError};
use crate::persistence::StoreError;
use crate::reliability::RetryPolicy;

/// The run has to stop now and be resumed later by the executor.
///
/// Workflow code must let these propagate with `?`; they are control flow,
/// not failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// A transient step failure; the step runs again at `wake_at`
    RetryScheduled {
        step: String,
        attempt: u32,
        wake_at: DateTime<Utc>,
        error: String,
    },

    /// A timed sleep that has not elapsed yet
    Sleeping { step: String, until: DateTime<Utc> },

    /// Cancellation was requested before the next step
    Cancelled,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetryScheduled {
                step,
                attempt,
                wake_at,
                ..
            } => write!(f, "step '{step}' attempt {attempt} failed, retry at {wake_at}"),
            Self::Sleeping { step, until } => write!(f, "sleeping at '{step}' until {until}"),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Error returned from a workflow body
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A step failed terminally. Its failure is memoized, so catching this
    /// and continuing with degraded output is replay-safe.
    #[error("step '{step}' failed: {error}")]
    StepFailed { step: String, error: StepError },

    #[error("{0}")]
    Interrupted(Interrupt),

    #[error("invalid workflow input: {0}")]
    InvalidInput(String),

    /// Broken workflow code (non-deterministic step order, bad serialization)
    #[error("unexpected workflow error: {0}")]
    Unexpected(String),

    /// Run bookkeeping could not be persisted; the run is left for reclamation
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// True for errors that mean "something nobody classified went wrong"
    pub fn is_unexpected(&self) -> bool {
        match self {
            Self::Unexpected(_) => true,
            Self::StepFailed { error, .. } => matches!(error, StepError::Unexpected(_)),
            _ => false,
        }
    }
}

/// A durable workflow: an ordered sequence of named steps.
///
/// `run` is replayed from the top every time the run is resumed. Every
/// external effect must go through [`StepContext::step`] so that completed
/// steps return their memoized result instead of running again. Step names
/// must be unique within a run and called in the same order on every replay.
///
/// ```ignore
/// struct Greet;
///
/// #[async_trait]
/// impl Workflow for Greet {
///     const NAME: &'static str = "greet";
///     type Input = String;
///     type Output = String;
///
///     async fn run(&self, ctx: &StepContext, name: String) -> Result<String, WorkflowError> {
///         let greeting = ctx
///             .step("build-greeting", |_| async move { Ok(format!("hello {name}")) })
///             .await?;
///         Ok(greeting)
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Registry name, also used in logs and persisted runs
    const NAME: &'static str;

    type Input: DeserializeOwned + Send + 'static;

    type Output: Serialize + Send + 'static;

    /// Retry policy applied to each step of this workflow
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    async fn run(&self, ctx: &StepContext, input: Self::Input)
        -> Result<Self::Output, WorkflowError>;
}
