//! End-to-end executor behaviour against the in-memory store
//!
//! Run with: cargo test -p neofeed-durable --test replay_test

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

use neofeed_durable::prelude::*;
use neofeed_durable::InsertOutcome;

// ============================================
// Fixtures
// ============================================

#[derive(Default)]
struct Counters {
    fetch: AtomicU32,
    fingerprint: AtomicU32,
    summarize: AtomicU32,
    persist: AtomicU32,
}

/// Four steps; the third waits on `gate` after signalling `entered`
struct FourSteps {
    counters: Arc<Counters>,
    gate: Arc<Semaphore>,
    entered: Arc<Notify>,
}

#[async_trait]
impl Workflow for FourSteps {
    const NAME: &'static str = "four-steps";
    type Input = String;
    type Output = String;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::immediate(3)
    }

    async fn run(&self, ctx: &StepContext, url: String) -> Result<String, WorkflowError> {
        let c = &self.counters;

        let body = ctx
            .step("fetch", |_| async move {
                c.fetch.fetch_add(1, Ordering::SeqCst);
                Ok(format!("body of {url}"))
            })
            .await?;

        let hash = ctx
            .step("fingerprint", |_| async {
                c.fingerprint.fetch_add(1, Ordering::SeqCst);
                Ok(format!("h{}", body.len()))
            })
            .await?;

        let summary = ctx
            .step("summarize", |_| async {
                self.entered.notify_one();
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| StepError::unexpected(e.to_string()))?;
                c.summarize.fetch_add(1, Ordering::SeqCst);
                Ok(format!("summary:{hash}"))
            })
            .await?;

        ctx.step("persist", |_| async {
            c.persist.fetch_add(1, Ordering::SeqCst);
            Ok(summary)
        })
        .await
    }
}

struct Parent;

#[async_trait]
impl Workflow for Parent {
    const NAME: &'static str = "parent";
    type Input = Vec<String>;
    type Output = FanOut;

    async fn run(&self, ctx: &StepContext, items: Vec<String>) -> Result<FanOut, WorkflowError> {
        let events = items
            .iter()
            .map(|item| Event::new("child.requested", json!(item)).with_dedupe_key(item.clone()))
            .collect();
        ctx.send_events("fan-out", events).await
    }
}

struct Child {
    seen: Arc<parking_lot::Mutex<Vec<String>>>,
}

#[async_trait]
impl Workflow for Child {
    const NAME: &'static str = "child";
    type Input = String;
    type Output = ();

    async fn run(&self, ctx: &StepContext, item: String) -> Result<(), WorkflowError> {
        ctx.step("record", |_| async {
            self.seen.lock().push(item.clone());
            Ok(())
        })
        .await
    }
}

struct World {
    store: Arc<InMemoryRunStore>,
    registry: Arc<WorkflowRegistry>,
    router: Arc<EventRouter>,
    counters: Arc<Counters>,
    gate: Arc<Semaphore>,
    entered: Arc<Notify>,
    seen: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl World {
    fn new() -> Self {
        let counters = Arc::new(Counters::default());
        let gate = Arc::new(Semaphore::new(0));
        let entered = Arc::new(Notify::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let registry = Arc::new(
            WorkflowRegistry::new()
                .with(FourSteps {
                    counters: counters.clone(),
                    gate: gate.clone(),
                    entered: entered.clone(),
                })
                .with(Parent)
                .with(Child { seen: seen.clone() }),
        );
        let store = Arc::new(InMemoryRunStore::new());
        let router = Arc::new(EventRouter::new(store.clone(), registry.clone()));
        router
            .register_trigger(Trigger::event("feed.process"), FourSteps::NAME)
            .unwrap();
        router
            .register_trigger(Trigger::event("child.requested"), Child::NAME)
            .unwrap();

        Self {
            store,
            registry,
            router,
            counters,
            gate,
            entered,
            seen,
        }
    }

    /// A fresh executor, as a restarted worker process would build
    fn executor(&self, worker_id: &str) -> Arc<WorkflowExecutor> {
        Arc::new(WorkflowExecutor::new(
            self.store.clone(),
            self.registry.clone(),
            self.router.clone(),
            ExecutorConfig::default().with_worker_id(worker_id),
        ))
    }
}

// ============================================
// Replay
// ============================================

#[test_log::test(tokio::test)]
async fn test_crash_after_step_two_does_not_repeat_steps_one_and_two() {
    let world = World::new();
    let receipt = world
        .router
        .emit(Event::new("feed.process", json!("https://a.example/x")))
        .await
        .unwrap();
    let run_id = receipt.run_ids()[0];

    // First worker gets as far as the third step, then dies
    let first = world.executor("worker-a");
    let task = tokio::spawn(async move { first.drive(run_id).await });
    world.entered.notified().await;
    task.abort();
    let _ = task.await;

    let steps = world.store.load_steps(run_id).await.unwrap();
    assert_eq!(steps.len(), 2);

    // Lease expires and is reclaimed
    world
        .store
        .expire_lease(run_id, Utc::now() - chrono::Duration::minutes(5));
    let reclaimed = world
        .store
        .reclaim_stale(Utc::now() - chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(reclaimed, vec![run_id]);

    // Restarted worker finishes the run
    world.gate.add_permits(1);
    let second = world.executor("worker-b");
    let outcome = second.drive(run_id).await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            output: json!("summary:h27")
        }
    );
    assert_eq!(world.counters.fetch.load(Ordering::SeqCst), 1);
    assert_eq!(world.counters.fingerprint.load(Ordering::SeqCst), 1);
    assert_eq!(world.counters.summarize.load(Ordering::SeqCst), 1);
    assert_eq!(world.counters.persist.load(Ordering::SeqCst), 1);

    let names: Vec<_> = second
        .step_results(run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.step_name)
        .collect();
    assert_eq!(names, ["fetch", "fingerprint", "summarize", "persist"]);
}

#[tokio::test]
async fn test_running_run_is_not_claimed_twice() {
    let world = World::new();
    let receipt = world
        .router
        .emit(Event::new("feed.process", json!("u")))
        .await
        .unwrap();
    let run_id = receipt.run_ids()[0];

    let first = world.executor("worker-a");
    let task = tokio::spawn(async move { first.drive(run_id).await });
    world.entered.notified().await;

    let other = world.executor("worker-b");
    assert_eq!(other.drive(run_id).await.unwrap(), RunOutcome::Skipped);
    assert_eq!(other.tick().await.unwrap(), 0);

    world.gate.add_permits(1);
    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
}

// ============================================
// Dedupe
// ============================================

#[tokio::test]
async fn test_duplicate_emission_while_running_starts_one_run() {
    let world = World::new();
    let event = || Event::new("feed.process", json!("https://a.example/x")).with_dedupe_key("u1:x");

    let first = world.router.emit(event()).await.unwrap();
    let run_id = first.run_ids()[0];

    let executor = world.executor("worker-a");
    let driver = executor.clone();
    let task = tokio::spawn(async move { driver.drive(run_id).await });
    world.entered.notified().await;

    let second = world.router.emit(event()).await.unwrap();
    assert_eq!(second.deduplicated().count(), 1);
    assert_eq!(second.run_ids(), vec![run_id]);

    world.gate.add_permits(1);
    task.await.unwrap().unwrap();
    assert_eq!(world.store.run_count(), 1);

    // Completed runs still absorb duplicates inside the dedupe window
    let third = world
        .store
        .insert_run(
            WorkflowRun::new(uuid::Uuid::now_v7(), FourSteps::NAME, event()),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert_eq!(third, InsertOutcome::Duplicate(run_id));
}

// ============================================
// Fan-out
// ============================================

#[tokio::test]
async fn test_fan_out_completes_parent_without_waiting_for_children() {
    let world = World::new();
    let executor = world.executor("worker-a");

    let execution = executor
        .execute(Parent::NAME, json!(["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(
        execution.outcome,
        RunOutcome::Completed {
            output: json!({"emitted": 3, "started": 3, "deduplicated": 0})
        }
    );
    assert!(world.seen.lock().is_empty());

    let children = executor
        .list_runs(&RunFilter::default().workflow(Child::NAME))
        .await
        .unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|r| r.status == RunStatus::Pending));

    executor.run_until_idle().await.unwrap();
    let mut seen = world.seen.lock().clone();
    seen.sort();
    assert_eq!(seen, ["a", "b", "c"]);

    // Same items again collapse into the existing child runs
    let again = executor
        .execute(Parent::NAME, json!(["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(
        again.outcome,
        RunOutcome::Completed {
            output: json!({"emitted": 3, "started": 0, "deduplicated": 3})
        }
    );
}

#[tokio::test]
async fn test_cancel_running_run_stops_before_next_step() {
    let world = World::new();
    let receipt = world
        .router
        .emit(Event::new("feed.process", json!("u")))
        .await
        .unwrap();
    let run_id = receipt.run_ids()[0];

    let executor = world.executor("worker-a");
    let driver = executor.clone();
    let task = tokio::spawn(async move { driver.drive(run_id).await });
    world.entered.notified().await;

    assert_eq!(executor.cancel(run_id).await.unwrap(), RunStatus::Running);
    world.gate.add_permits(1);

    // The in-flight step finishes and is memoized; the next one never starts
    assert_eq!(task.await.unwrap().unwrap(), RunOutcome::Cancelled);
    assert_eq!(world.counters.summarize.load(Ordering::SeqCst), 1);
    assert_eq!(world.counters.persist.load(Ordering::SeqCst), 0);
    assert_eq!(executor.step_results(run_id).await.unwrap().len(), 3);
    assert_eq!(
        executor.get_run(run_id).await.unwrap().status,
        RunStatus::Cancelled
    );
}
