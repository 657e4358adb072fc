//! Workflow executor with memoized replay
//!
//! The `WorkflowExecutor` is responsible for:
//! - Creating runs (directly or through the router)
//! - Leasing runs and replaying their body against stored step results
//! - Translating the body's result into a run transition
//! - Cancellation and inspection

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::persistence::{
    InsertOutcome, RunFilter, RunStatus, RunStore, StepRecord, StoreError, WorkflowRun,
};
use crate::router::{Event, EventRouter, EventSink, RouterError};
use crate::workflow::{Interrupt, StepContext, WorkflowError};

use super::registry::{RegistryError, WorkflowRegistry};

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Lease owner recorded on claimed runs
    pub worker_id: String,

    /// Runs claimed per [`WorkflowExecutor::tick`]
    pub claim_batch_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            claim_batch_size: 16,
        }
    }
}

impl ExecutorConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_claim_batch_size(mut self, size: usize) -> Self {
        self.claim_batch_size = size.max(1);
        self
    }
}

/// Errors from executor operations. Workflow failures are not errors here;
/// they are reported as [`RunOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),
}

/// What one pass over a run achieved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        output: Value,
    },
    Failed {
        error: String,
    },
    /// Waiting on a timed sleep
    Suspended {
        until: DateTime<Utc>,
    },
    RetryScheduled {
        step: String,
        attempt: u32,
        wake_at: DateTime<Utc>,
    },
    Cancelled,
    /// Not due, already terminal, or leased by someone else
    Skipped,
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// A run created by [`WorkflowExecutor::execute`] and the outcome of its first pass
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
}

/// Workflow executor
///
/// ```ignore
/// use neofeed_durable::prelude::*;
///
/// let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
/// let registry = Arc::new(WorkflowRegistry::new().with(MyWorkflow));
/// let router = Arc::new(EventRouter::new(store.clone(), registry.clone()));
/// let executor = WorkflowExecutor::new(store, registry, router, ExecutorConfig::default());
///
/// let execution = executor.execute("my-workflow", json!({"n": 1})).await?;
/// ```
pub struct WorkflowExecutor {
    store: Arc<dyn RunStore>,
    registry: Arc<WorkflowRegistry>,
    router: Arc<EventRouter>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn RunStore>,
        registry: Arc<WorkflowRegistry>,
        router: Arc<EventRouter>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            router,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Create a pending run of `workflow` for `event`
    pub async fn start(&self, workflow: &str, event: Event) -> Result<InsertOutcome, ExecutorError> {
        Ok(self.router.start_run(workflow, event).await?)
    }

    /// Start `workflow` with `payload` and drive it once.
    ///
    /// The outcome is final unless the run suspended or scheduled a retry,
    /// in which case the worker pool resumes it later.
    #[instrument(skip(self, payload))]
    pub async fn execute(&self, workflow: &str, payload: Value) -> Result<Execution, ExecutorError> {
        let event = Event::new(format!("direct/{workflow}"), payload);
        let run_id = self.start(workflow, event).await?.run_id();
        let outcome = self.drive(run_id).await?;
        Ok(Execution { run_id, outcome })
    }

    /// Lease `run_id` if it is due and run one pass over it
    #[instrument(skip(self))]
    pub async fn drive(&self, run_id: Uuid) -> Result<RunOutcome, ExecutorError> {
        match self
            .store
            .claim_run(run_id, &self.config.worker_id, Utc::now())
            .await?
        {
            Some(run) => self.process_claimed(run).await,
            None => {
                debug!(%run_id, "run not due, skipping");
                Ok(RunOutcome::Skipped)
            }
        }
    }

    /// Claim up to `claim_batch_size` due runs and process them concurrently.
    /// Returns the number of runs processed.
    pub async fn tick(&self) -> Result<usize, ExecutorError> {
        let runs = self
            .store
            .claim_due_runs(
                &self.config.worker_id,
                Utc::now(),
                self.config.claim_batch_size,
            )
            .await?;
        let count = runs.len();

        for result in join_all(runs.into_iter().map(|run| self.process_claimed(run))).await {
            if let Err(e) = result {
                error!("Run processing failed: {}", e);
            }
        }
        Ok(count)
    }

    /// Process due runs until none are left. Runs sleeping into the future
    /// are left alone. Intended for tests and one-shot tools.
    pub async fn run_until_idle(&self) -> Result<usize, ExecutorError> {
        let mut total = 0;
        loop {
            let processed = self.tick().await?;
            if processed == 0 {
                return Ok(total);
            }
            total += processed;
        }
    }

    /// One pass over a run this worker already leased
    #[instrument(skip(self, run), fields(run_id = %run.id, workflow = %run.workflow_name))]
    pub async fn process_claimed(&self, run: WorkflowRun) -> Result<RunOutcome, ExecutorError> {
        let run_id = run.id;

        if run.cancel_requested {
            self.store.cancel_run(run_id).await?;
            info!(%run_id, "run cancelled before start");
            return Ok(RunOutcome::Cancelled);
        }

        let workflow = match self.registry.get(&run.workflow_name) {
            Ok(workflow) => workflow,
            Err(e) => {
                error!(%run_id, alert = true, "{}", e);
                self.store.fail_run(run_id, &e.to_string()).await?;
                return Ok(RunOutcome::Failed {
                    error: e.to_string(),
                });
            }
        };

        let steps = self.store.load_steps(run_id).await?;
        let payload = run.event.payload.clone();
        let sink: Arc<dyn EventSink> = self.router.clone();
        let ctx = StepContext::new(
            run,
            steps,
            Arc::clone(&self.store),
            sink,
            workflow.retry_policy(),
        );

        let result = workflow.run_json(&ctx, payload).await;
        let result = match ctx.take_interrupt() {
            Some(interrupt) => Err(WorkflowError::Interrupted(interrupt)),
            None => result,
        };

        self.settle(run_id, result).await
    }

    async fn settle(
        &self,
        run_id: Uuid,
        result: Result<Value, WorkflowError>,
    ) -> Result<RunOutcome, ExecutorError> {
        match result {
            Ok(output) => {
                self.store.complete_run(run_id, output.clone()).await?;
                info!(%run_id, "run completed");
                Ok(RunOutcome::Completed { output })
            }
            Err(WorkflowError::Interrupted(Interrupt::RetryScheduled {
                step,
                attempt,
                wake_at,
                error,
            })) => {
                self.store
                    .schedule_retry(run_id, attempt, wake_at, &error)
                    .await?;
                Ok(RunOutcome::RetryScheduled {
                    step,
                    attempt,
                    wake_at,
                })
            }
            Err(WorkflowError::Interrupted(Interrupt::Sleeping { step, until })) => {
                self.store.suspend(run_id, until).await?;
                debug!(%run_id, %step, %until, "run suspended");
                Ok(RunOutcome::Suspended { until })
            }
            Err(WorkflowError::Interrupted(Interrupt::Cancelled)) => {
                self.store.cancel_run(run_id).await?;
                info!(%run_id, "run cancelled");
                Ok(RunOutcome::Cancelled)
            }
            Err(WorkflowError::Store(e)) => {
                // Lease stays in place; stale reclamation hands the run back
                error!(%run_id, "Failed to persist run progress: {}", e);
                Err(ExecutorError::Store(e))
            }
            Err(e) => {
                if e.is_unexpected() {
                    error!(%run_id, alert = true, error = %e, "run failed with unexpected error");
                } else {
                    warn!(%run_id, error = %e, "run failed");
                }
                let error = e.to_string();
                self.store.fail_run(run_id, &error).await?;
                Ok(RunOutcome::Failed { error })
            }
        }
    }

    /// Request cancellation; takes effect before the run's next step
    pub async fn cancel(&self, run_id: Uuid) -> Result<RunStatus, ExecutorError> {
        match self.store.request_cancel(run_id).await {
            Ok(status) => {
                info!(%run_id, %status, "cancellation requested");
                Ok(status)
            }
            Err(StoreError::RunNotFound(id)) => Err(ExecutorError::RunNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, ExecutorError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or(ExecutorError::RunNotFound(run_id))
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, ExecutorError> {
        Ok(self.store.list_runs(filter).await?)
    }

    pub async fn step_results(&self, run_id: Uuid) -> Result<Vec<StepRecord>, ExecutorError> {
        Ok(self.store.load_steps(run_id).await?)
    }
}
