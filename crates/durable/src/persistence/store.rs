//! RunStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::router::Event;
use crate::workflow::StepError;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Run is not in a state that allows the transition
    #[error("run {run_id} is {status}, cannot {operation}")]
    InvalidTransition {
        run_id: Uuid,
        status: RunStatus,
        operation: &'static str,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Lifecycle of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, waiting for a worker
    Pending,

    /// Leased by a worker
    Running,

    /// Waiting for `wake_at` (timed suspension or scheduled retry)
    Sleeping,

    Completed,

    /// Exhausted retries or hit a permanent error
    Failed,

    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "sleeping" => Ok(Self::Sleeping),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::Serialization(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_name: String,
    pub event: Event,
    pub status: RunStatus,
    /// Number of steps with a memoized result
    pub current_step_index: u32,
    /// Failed attempts of the step at `current_step_index`
    pub current_step_attempts: u32,
    pub wake_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub lease_owner: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(id: Uuid, workflow_name: impl Into<String>, event: Event) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow_name: workflow_name.into(),
            event,
            status: RunStatus::Pending,
            current_step_index: 0,
            current_step_attempts: 0,
            wake_at: None,
            cancel_requested: false,
            output: None,
            error: None,
            lease_owner: None,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// True if a worker may lease this run at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            RunStatus::Pending => true,
            RunStatus::Sleeping => self.wake_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    /// True if this run blocks a new run with the same dedupe identity
    pub fn blocks_duplicate(&self, window_start: DateTime<Utc>) -> bool {
        match self.status {
            RunStatus::Pending | RunStatus::Running | RunStatus::Sleeping => true,
            RunStatus::Completed => self.completed_at.is_some_and(|at| at >= window_start),
            RunStatus::Failed | RunStatus::Cancelled => false,
        }
    }
}

/// Result of [`RunStore::insert_run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(Uuid),
    /// An active run already exists for the same (workflow, event name, dedupe key)
    Duplicate(Uuid),
}

impl InsertOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::Duplicate(id) => *id,
        }
    }
}

/// Memoized outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { output: Value },
    Failed { error: StepError },
}

/// Memoization record keyed by (run_id, step_name); written at most once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: Uuid,
    pub step_name: String,
    pub step_index: u32,
    pub outcome: StepOutcome,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// Filter for [`RunStore::list_runs`]
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow_name: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = Some(name.into());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, run: &WorkflowRun) -> bool {
        self.workflow_name
            .as_deref()
            .map_or(true, |name| run.workflow_name == name)
            && self.status.map_or(true, |status| run.status == status)
    }
}

/// Persistence for workflow runs and their step results
///
/// All transitions that end a lease (`schedule_retry`, `suspend`,
/// `complete_run`, `fail_run`, `cancel_run`) clear `lease_owner`.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    // =========================================================================
    // Run lifecycle
    // =========================================================================

    /// Insert a pending run unless an active run with the same
    /// (workflow, event name, dedupe key) exists. Runs completed within
    /// `dedupe_window` count as active.
    async fn insert_run(
        &self,
        run: WorkflowRun,
        dedupe_window: Duration,
    ) -> Result<InsertOutcome, StoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, StoreError>;

    /// Newest first
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Lease up to `limit` due runs (pending, or sleeping past `wake_at`)
    async fn claim_due_runs(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Lease one specific run if it is due
    async fn claim_run(
        &self,
        run_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowRun>, StoreError>;

    /// Refresh the lease heartbeat of every run held by `worker_id`
    async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Return running runs whose heartbeat is older than `stale_before` to pending
    async fn reclaim_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    /// Record a failed attempt of the current step and put the run to sleep
    async fn schedule_retry(
        &self,
        run_id: Uuid,
        attempts: u32,
        wake_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn suspend(&self, run_id: Uuid, wake_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn complete_run(&self, run_id: Uuid, output: Value) -> Result<(), StoreError>;

    async fn fail_run(&self, run_id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn cancel_run(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Ask for cancellation. Runs that are not leased are cancelled at once;
    /// a running run observes the flag before its next step.
    async fn request_cancel(&self, run_id: Uuid) -> Result<RunStatus, StoreError>;

    // =========================================================================
    // Step results
    // =========================================================================

    async fn load_steps(&self, run_id: Uuid) -> Result<Vec<StepRecord>, StoreError>;

    /// Persist a step result. The first write for (run_id, step_name) wins
    /// and is returned; later writes are ignored.
    async fn save_step(&self, record: StepRecord) -> Result<StepRecord, StoreError>;

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Delete completed runs (and their steps) finished before `before`
    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let _ = before;
        Ok(0)
    }
}
