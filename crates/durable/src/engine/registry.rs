//! Workflow registry for type-erased execution
//!
//! Workflows are registered as instances (they carry their collaborators)
//! and executed through JSON input/output without the executor knowing the
//! concrete type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::reliability::RetryPolicy;
use crate::workflow::{StepContext, Workflow, WorkflowError};

/// Type-erased workflow interface
#[async_trait]
pub trait AnyWorkflow: Send + Sync {
    fn name(&self) -> &'static str;

    fn retry_policy(&self) -> RetryPolicy;

    /// Decode the trigger payload, run the body, encode the output
    async fn run_json(&self, ctx: &StepContext, input: Value) -> Result<Value, WorkflowError>;
}

struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

#[async_trait]
impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    fn name(&self) -> &'static str {
        W::NAME
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy()
    }

    async fn run_json(&self, ctx: &StepContext, input: Value) -> Result<Value, WorkflowError> {
        let input: W::Input = serde_json::from_value(input)
            .map_err(|e| WorkflowError::InvalidInput(e.to_string()))?;
        let output = self.inner.run(ctx, input).await?;
        serde_json::to_value(output)
            .map_err(|e| WorkflowError::Unexpected(format!("workflow output: {e}")))
    }
}

/// Registry of workflows by name
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<&'static str, Arc<dyn AnyWorkflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow instance under `W::NAME`, replacing any previous one
    ///
    /// ```ignore
    /// let mut registry = WorkflowRegistry::new();
    /// registry.register(IngestFeedWorkflow::new(deps));
    /// ```
    pub fn register<W: Workflow>(&mut self, workflow: W) -> &mut Self {
        self.workflows
            .insert(W::NAME, Arc::new(WorkflowWrapper { inner: workflow }));
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<W: Workflow>(mut self, workflow: W) -> Self {
        self.register(workflow);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AnyWorkflow>, RegistryError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflow(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.workflows.keys().copied()
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &names)
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),
}
