//! Step execution context handed to a running workflow

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{Interrupt, StepError, WorkflowError};
use crate::persistence::{RunStore, StepOutcome, StepRecord, WorkflowRun};
use crate::reliability::RetryPolicy;
use crate::router::{Event, EventSink};

/// Information about the attempt being made for one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAttempt {
    pub run_id: Uuid,
    pub step: String,
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
}

impl StepAttempt {
    /// Deterministic key for making the step's external write idempotent.
    /// Identical across retries and replays of the same step.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.step)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Result of a memoized fan-out step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOut {
    pub emitted: usize,
    pub started: usize,
    pub deduplicated: usize,
}

#[derive(Default)]
struct Cursor {
    next_index: u32,
    seen: HashSet<String>,
}

/// Context for one pass over a workflow body.
///
/// Built by the executor from the run and its stored step results. Each
/// pass replays memoized steps and executes at most until the first
/// interrupt.
pub struct StepContext {
    run: WorkflowRun,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
    memo: Mutex<HashMap<String, StepRecord>>,
    cursor: Mutex<Cursor>,
    interrupt: Mutex<Option<Interrupt>>,
}

impl StepContext {
    pub(crate) fn new(
        run: WorkflowRun,
        steps: Vec<StepRecord>,
        store: Arc<dyn RunStore>,
        sink: Arc<dyn EventSink>,
        policy: RetryPolicy,
    ) -> Self {
        let memo = steps
            .into_iter()
            .map(|record| (record.step_name.clone(), record))
            .collect();
        Self {
            run,
            store,
            sink,
            policy,
            memo: Mutex::new(memo),
            cursor: Mutex::new(Cursor::default()),
            interrupt: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn workflow_name(&self) -> &str {
        &self.run.workflow_name
    }

    /// The event that created this run
    pub fn event(&self) -> &Event {
        &self.run.event
    }

    /// Run a memoized step.
    ///
    /// If `(run_id, name)` already has a result it is returned without
    /// calling `f`. Otherwise `f` runs once for this pass; success is
    /// persisted before returning, a transient failure schedules a retry
    /// (returned as [`WorkflowError::Interrupted`]), and anything else is
    /// persisted as the step's terminal failure.
    pub async fn step<T, F, Fut>(&self, name: &str, f: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(StepAttempt) -> Fut + Send,
        Fut: Future<Output = Result<T, StepError>> + Send,
    {
        let index = self.enter(name)?;

        if let Some(record) = self.memoized(name, index)? {
            return match record.outcome {
                StepOutcome::Succeeded { output } => serde_json::from_value(output).map_err(|e| {
                    WorkflowError::Unexpected(format!("memoized output of '{name}': {e}"))
                }),
                StepOutcome::Failed { error } => Err(WorkflowError::StepFailed {
                    step: name.to_string(),
                    error,
                }),
            };
        }

        self.ensure_not_cancelled().await?;

        let attempt = self.attempt_number(index);
        let info = StepAttempt {
            run_id: self.run.id,
            step: name.to_string(),
            attempt,
            max_attempts: self.policy.max_attempts,
        };
        debug!(run_id = %self.run.id, step = name, attempt, "executing step");

        match f(info).await {
            Ok(value) => {
                let output = serde_json::to_value(&value).map_err(|e| {
                    WorkflowError::Unexpected(format!("output of '{name}' is not serializable: {e}"))
                })?;
                let stored = self
                    .record(name, index, StepOutcome::Succeeded { output: output.clone() }, attempt)
                    .await?;
                match stored.outcome {
                    StepOutcome::Succeeded { output: first } if first != output => {
                        // Another pass memoized this step first; its result is authoritative
                        serde_json::from_value(first)
                            .map_err(|e| WorkflowError::Unexpected(e.to_string()))
                    }
                    StepOutcome::Failed { error } => Err(WorkflowError::StepFailed {
                        step: name.to_string(),
                        error,
                    }),
                    _ => Ok(value),
                }
            }
            Err(error) => self.handle_failure(name, index, attempt, error).await,
        }
    }

    /// Suspend the run until `duration` after the first time this sleep is
    /// reached. The wake-up time is memoized, so replays do not extend it.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<(), WorkflowError> {
        let index = self.enter(name)?;

        let wake_at = match self.memoized(name, index)? {
            Some(StepRecord {
                outcome: StepOutcome::Succeeded { output },
                ..
            }) => serde_json::from_value::<DateTime<Utc>>(output).map_err(|e| {
                WorkflowError::Unexpected(format!("memoized wake time of '{name}': {e}"))
            })?,
            Some(_) => {
                return Err(WorkflowError::Unexpected(format!(
                    "sleep '{name}' has a failed step record"
                )))
            }
            None => {
                self.ensure_not_cancelled().await?;
                let wake_at = Utc::now()
                    + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
                let output = serde_json::to_value(wake_at)
                    .map_err(|e| WorkflowError::Unexpected(e.to_string()))?;
                self.record(name, index, StepOutcome::Succeeded { output }, 1)
                    .await?;
                wake_at
            }
        };

        if Utc::now() < wake_at {
            return Err(self.raise(Interrupt::Sleeping {
                step: name.to_string(),
                until: wake_at,
            }));
        }
        Ok(())
    }

    /// Emit events as one memoized step. Events without a dedupe key get
    /// `"{run_id}:{step}:{index}"` so a crash between emit and memoization
    /// cannot start the same downstream run twice. The emitting run does not
    /// wait for the runs it starts.
    pub async fn send_events(&self, name: &str, events: Vec<Event>) -> Result<FanOut, WorkflowError> {
        let sink = Arc::clone(&self.sink);
        self.step(name, move |attempt| async move {
            let key_prefix = attempt.idempotency_key();
            let mut fan_out = FanOut::default();
            for (i, mut event) in events.into_iter().enumerate() {
                if event.dedupe_key.is_none() {
                    event.dedupe_key = Some(format!("{key_prefix}:{i}"));
                }
                let receipt = sink
                    .emit(event)
                    .await
                    .map_err(|e| StepError::transient(e.to_string()))?;
                fan_out.emitted += 1;
                fan_out.started += receipt.started().count();
                fan_out.deduplicated += receipt.deduplicated().count();
            }
            Ok(fan_out)
        })
        .await
    }

    /// Interrupt raised during this pass, if any. The executor honours it
    /// even if the workflow body swallowed the error.
    pub(crate) fn take_interrupt(&self) -> Option<Interrupt> {
        self.interrupt.lock().take()
    }

    fn enter(&self, name: &str) -> Result<u32, WorkflowError> {
        let mut cursor = self.cursor.lock();
        if !cursor.seen.insert(name.to_string()) {
            return Err(WorkflowError::Unexpected(format!(
                "step name '{name}' used twice in one run"
            )));
        }
        let index = cursor.next_index;
        cursor.next_index += 1;
        Ok(index)
    }

    fn memoized(&self, name: &str, index: u32) -> Result<Option<StepRecord>, WorkflowError> {
        match self.memo.lock().get(name) {
            Some(record) if record.step_index != index => Err(WorkflowError::Unexpected(format!(
                "step '{name}' replayed at position {index} but was recorded at {}",
                record.step_index
            ))),
            other => Ok(other.cloned()),
        }
    }

    fn attempt_number(&self, index: u32) -> u32 {
        if index == self.run.current_step_index {
            self.run.current_step_attempts + 1
        } else {
            1
        }
    }

    async fn ensure_not_cancelled(&self) -> Result<(), WorkflowError> {
        let cancelled = self
            .store
            .get_run(self.run.id)
            .await?
            .map_or(false, |run| run.cancel_requested);
        if cancelled {
            return Err(self.raise(Interrupt::Cancelled));
        }
        Ok(())
    }

    async fn handle_failure<T>(
        &self,
        name: &str,
        index: u32,
        attempt: u32,
        error: StepError,
    ) -> Result<T, WorkflowError> {
        let run_id = self.run.id;

        let terminal = match error {
            StepError::Transient(message) if self.policy.has_attempts_remaining(attempt) => {
                let wake_at = self.policy.next_attempt_at(Utc::now(), attempt);
                warn!(%run_id, step = name, attempt, %wake_at, error = %message, "step failed, retry scheduled");
                return Err(self.raise(Interrupt::RetryScheduled {
                    step: name.to_string(),
                    attempt,
                    wake_at,
                    error: message,
                }));
            }
            StepError::Transient(message) => {
                warn!(%run_id, step = name, attempt, error = %message, "step retries exhausted");
                StepError::Permanent(format!("{message} (gave up after {attempt} attempts)"))
            }
            StepError::Unexpected(message) => {
                error!(%run_id, step = name, attempt, alert = true, error = %message, "unexpected step error");
                StepError::Unexpected(message)
            }
            permanent @ StepError::Permanent(_) => {
                warn!(%run_id, step = name, attempt, error = %permanent, "step failed permanently");
                permanent
            }
        };

        let recorded = self
            .record(
                name,
                index,
                StepOutcome::Failed {
                    error: terminal.clone(),
                },
                attempt,
            )
            .await?;

        let error = match recorded.outcome {
            StepOutcome::Failed { error } => error,
            // A concurrent writer memoized a success first
            StepOutcome::Succeeded { .. } => terminal,
        };
        Err(WorkflowError::StepFailed {
            step: name.to_string(),
            error,
        })
    }

    async fn record(
        &self,
        name: &str,
        index: u32,
        outcome: StepOutcome,
        attempts: u32,
    ) -> Result<StepRecord, WorkflowError> {
        let record = StepRecord {
            run_id: self.run.id,
            step_name: name.to_string(),
            step_index: index,
            outcome,
            attempts,
            completed_at: Utc::now(),
        };
        let stored = self.store.save_step(record).await?;
        self.memo.lock().insert(name.to_string(), stored.clone());
        Ok(stored)
    }

    fn raise(&self, interrupt: Interrupt) -> WorkflowError {
        *self.interrupt.lock() = Some(interrupt.clone());
        WorkflowError::Interrupted(interrupt)
    }
}
