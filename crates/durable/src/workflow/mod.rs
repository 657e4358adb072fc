//! Workflow abstractions
//!
//! - [`Workflow`] trait: a named, ordered sequence of memoized steps
//! - [`StepContext`] handed to a running workflow for steps, sleeps and fan-out
//! - [`StepError`] classification of a single step failure
//! - [`WorkflowError`] what a workflow body returns

mod context;
mod definition;
mod step;

pub use context::{FanOut, StepAttempt, StepContext};
pub use definition::{Interrupt, Workflow, WorkflowError};
pub use step::{StepError, StepErrorKind};
