// Discovery cleanup workflow (weekly cron)
//
// - deletes subscriptions deactivated longer than the retention period
// - trims any watermark above capacity
// - purges completed runs older than the retention period; failed runs stay

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use neofeed_durable::{CronTick, RetryPolicy, RunStore, StepContext, StepError, Workflow, WorkflowError};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::PipelineDeps;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub subscriptions_deleted: u64,
    pub watermarks_trimmed: u64,
    pub runs_purged: u64,
}

pub struct DiscoveryCleanupWorkflow {
    deps: PipelineDeps,
    runs: Arc<dyn RunStore>,
    retention: Duration,
    watermark_capacity: usize,
    retry: RetryPolicy,
}

impl DiscoveryCleanupWorkflow {
    pub fn new(
        deps: PipelineDeps,
        runs: Arc<dyn RunStore>,
        retention: Duration,
        watermark_capacity: usize,
    ) -> Self {
        Self {
            deps,
            runs,
            retention,
            watermark_capacity,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Workflow for DiscoveryCleanupWorkflow {
    const NAME: &'static str = "discovery-cleanup";
    type Input = CronTick;
    type Output = CleanupReport;

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    async fn run(&self, ctx: &StepContext, tick: CronTick) -> Result<CleanupReport, WorkflowError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| WorkflowError::InvalidInput(format!("retention: {e}")))?;
        let cutoff = tick.scheduled_at - retention;

        let subscriptions = self.deps.subscriptions.clone();
        let subscriptions_deleted: u64 = ctx
            .step("delete-inactive", |_| async move {
                Ok(subscriptions.delete_inactive_before(cutoff).await?)
            })
            .await?;

        let subscriptions = self.deps.subscriptions.clone();
        let capacity = self.watermark_capacity;
        let watermarks_trimmed: u64 = ctx
            .step("trim-watermarks", |_| async move {
                Ok(subscriptions.trim_watermarks(capacity).await?)
            })
            .await?;

        let runs = self.runs.clone();
        let runs_purged: u64 = ctx
            .step("purge-runs", |_| async move {
                runs.purge_completed(cutoff)
                    .await
                    .map_err(|e| StepError::transient(e.to_string()))
            })
            .await?;

        let report = CleanupReport {
            subscriptions_deleted,
            watermarks_trimmed,
            runs_purged,
        };
        info!(?report, %cutoff, "discovery cleanup finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Utc;
    use neofeed_core::traits::SubscriptionStore;
    use neofeed_core::SubscriptionState;
    use neofeed_durable::RunOutcome;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_cleanup_removes_stale_state_and_trims_watermarks() {
        let h = Harness::with_capacity(3).await;
        let now = Utc::now();

        let mut stale = SubscriptionState::new(Uuid::now_v7(), "https://stale.example/rss");
        stale.deactivate(now - chrono::Duration::days(45));
        let mut recent = SubscriptionState::new(Uuid::now_v7(), "https://recent.example/rss");
        recent.deactivate(now - chrono::Duration::days(2));
        let mut oversized = SubscriptionState::new(Uuid::now_v7(), "https://big.example/rss");
        oversized.record_poll((0..6).map(|i| format!("i{i}")), 100, now);
        for state in [&stale, &recent, &oversized] {
            h.subscriptions.write_subscription(state).await.unwrap();
        }

        let receipt = h.router.fire_cron(DiscoveryCleanupWorkflow::NAME).await.unwrap();
        let outcome = h.executor.drive(receipt.run_ids()[0]).await.unwrap();
        let RunOutcome::Completed { output } = outcome else {
            panic!("cleanup did not complete: {outcome:?}");
        };
        let report: CleanupReport = serde_json::from_value(output).unwrap();

        assert_eq!(report.subscriptions_deleted, 1);
        assert_eq!(report.watermarks_trimmed, 1);
        assert!(h
            .subscriptions
            .read_subscription(stale.subscription_id)
            .await
            .unwrap()
            .is_none());
        let trimmed = h
            .subscriptions
            .read_subscription(oversized.subscription_id)
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<_> = trimmed.last_seen_item_ids.iter().cloned().collect();
        assert_eq!(ids, vec!["i3", "i4", "i5"]);
    }
}
