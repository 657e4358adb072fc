//! Worker pool for run execution
//!
//! Leases due runs from the store and drives them through the executor
//! with bounded concurrency and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::poller::{PollerConfig, RunPoller};
use crate::engine::{RunOutcome, WorkflowExecutor};
use crate::persistence::StoreError;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum runs executing at once
    pub max_concurrency: usize,

    pub poller: PollerConfig,

    /// How often leases of in-flight runs are refreshed
    pub heartbeat_interval: Duration,

    pub stale_reclaim_interval: Duration,

    /// A running run whose heartbeat is older than this is handed back
    pub stale_threshold: Duration,

    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            poller: PollerConfig::default(),
            heartbeat_interval: Duration::from_secs(5),
            stale_reclaim_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_stale_reclaim_interval(mut self, interval: Duration) -> Self {
        self.stale_reclaim_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    Running,
    /// Finishing in-flight runs, not leasing new ones
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Worker pool
///
/// ```ignore
/// let pool = WorkerPool::new(executor, WorkerPoolConfig::default().with_max_concurrency(20));
/// pool.start()?;
/// // ...
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    executor: Arc<WorkflowExecutor>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: RwLock<WorkerPoolStatus>,
    permits: Arc<Semaphore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(executor: Arc<WorkflowExecutor>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            shutdown_tx,
            shutdown_rx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the poll, heartbeat and reclaim loops
    #[instrument(skip(self), fields(worker_id = %self.executor.worker_id()))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }
        self.shutdown_tx.send_replace(false);

        info!(
            worker_id = %self.executor.worker_id(),
            max_concurrency = self.config.max_concurrency,
            "Starting worker pool"
        );

        let mut handles = self.handles.lock();
        handles.push(self.spawn_poll_loop());
        handles.push(self.spawn_heartbeat_loop());
        handles.push(self.spawn_reclaim_loop());
        Ok(())
    }

    /// Stop leasing new runs and wait for in-flight runs to finish
    #[instrument(skip(self), fields(worker_id = %self.executor.worker_id()))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!(worker_id = %self.executor.worker_id(), "Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let result = loop {
            let available = self.permits.available_permits();
            if available == self.config.max_concurrency {
                debug!("All runs drained");
                break Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining_runs = self.config.max_concurrency - available,
                    "Shutdown timeout reached"
                );
                break Err(WorkerPoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };

        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        *self.status.write() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.executor.worker_id(), "Worker pool stopped");
        result
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Runs currently executing on this pool
    pub fn current_load(&self) -> usize {
        self.config.max_concurrency - self.permits.available_permits()
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        let permits = Arc::clone(&self.permits);
        let mut poller = RunPoller::new(
            self.config.poller.clone(),
            executor.router().wakeup(),
            self.shutdown_rx.clone(),
        );

        tokio::spawn(async move {
            loop {
                if poller.is_shutdown() {
                    debug!("Poll loop: shutdown requested");
                    break;
                }

                let available = permits.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                let limit = available.min(executor.config().claim_batch_size);
                let runs = match executor
                    .store()
                    .claim_due_runs(executor.worker_id(), Utc::now(), limit)
                    .await
                {
                    Ok(runs) => runs,
                    Err(e) => {
                        error!("Poll error: {}", e);
                        Vec::new()
                    }
                };
                poller.record_poll(runs.len());

                let claimed = !runs.is_empty();
                for run in runs {
                    // At most `available` runs were claimed, so a permit is free
                    let permit = match Arc::clone(&permits).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let executor = Arc::clone(&executor);
                    tokio::spawn(async move {
                        let run_id = run.id;
                        match executor.process_claimed(run).await {
                            Ok(RunOutcome::Failed { error }) => {
                                debug!(%run_id, %error, "run finished as failed");
                            }
                            Ok(outcome) => debug!(%run_id, ?outcome, "run pass finished"),
                            Err(e) => error!(%run_id, "Run execution error: {}", e),
                        }
                        drop(permit);
                    });
                }

                if !claimed && poller.wait().await {
                    break;
                }
            }
            debug!("Poll loop exited");
        })
    }

    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        let interval = self.config.heartbeat_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = executor.store().heartbeat(executor.worker_id(), Utc::now()).await {
                            error!("Heartbeat failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Heartbeat loop: shutdown requested");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_reclaim_loop(&self) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        let interval = self.config.stale_reclaim_interval;
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or(chrono::Duration::seconds(60));
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match executor.store().reclaim_stale(Utc::now() - threshold).await {
                            Ok(reclaimed) if !reclaimed.is_empty() => {
                                info!(count = reclaimed.len(), "Reclaimed stale runs");
                                executor.router().wakeup().notify_one();
                            }
                            Ok(_) => {}
                            Err(e) => error!("Stale run reclamation failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Reclaim loop: shutdown requested");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutorConfig, WorkflowRegistry};
    use crate::persistence::{InMemoryRunStore, RunStatus, RunStore};
    use crate::router::{Event, EventRouter, EventSink, Trigger};
    use crate::workflow::{StepContext, Workflow, WorkflowError};
    use async_trait::async_trait;
    use serde_json::json;

    struct Double;

    #[async_trait]
    impl Workflow for Double {
        const NAME: &'static str = "double";
        type Input = i64;
        type Output = i64;

        async fn run(&self, ctx: &StepContext, n: i64) -> Result<i64, WorkflowError> {
            ctx.step("double", |_| async move { Ok(n * 2) }).await
        }
    }

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(WorkerPoolConfig::default().with_max_concurrency(0).max_concurrency, 1);
    }

    #[tokio::test]
    async fn test_pool_executes_emitted_runs_and_shuts_down() {
        let store = Arc::new(InMemoryRunStore::new());
        let registry = Arc::new(WorkflowRegistry::new().with(Double));
        let router = Arc::new(EventRouter::new(store.clone(), registry.clone()));
        router.register_trigger(Trigger::event("n"), "double").unwrap();
        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            registry,
            router.clone(),
            ExecutorConfig::default(),
        ));

        let pool = WorkerPool::new(
            executor,
            WorkerPoolConfig::default()
                .with_poller(PollerConfig::default().with_min_interval(Duration::from_millis(10))),
        );
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkerPoolError::AlreadyRunning)));

        let receipt = router.emit(Event::new("n", json!(21))).await.unwrap();
        let run_id = receipt.run_ids()[0];

        let mut status = RunStatus::Pending;
        for _ in 0..100 {
            status = store.get_run(run_id).await.unwrap().unwrap().status;
            if status == RunStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, RunStatus::Completed);
        assert_eq!(store.get_run(run_id).await.unwrap().unwrap().output, Some(json!(42)));

        pool.shutdown().await.unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        assert_eq!(pool.current_load(), 0);
    }
}
