//! Workflow execution engine
//!
//! The engine module provides the `WorkflowExecutor`, which leases runs and
//! replays workflow bodies against their memoized step results.

mod executor;
mod registry;

pub use executor::{Execution, ExecutorConfig, ExecutorError, RunOutcome, WorkflowExecutor};
pub use registry::{AnyWorkflow, RegistryError, WorkflowRegistry};
