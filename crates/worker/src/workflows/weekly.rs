// Weekly report workflows
//
// The scheduler lists eligible users fresh at each tick and emits one
// report.generate per user for the previous ISO week. The generator
// aggregates that user's week, asks the summarizer for a narrative (the
// plain digest goes out if that fails), saves the report and delivers it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neofeed_core::{
    Digest, FeedRecord, NotificationChannel, RenderedReport, WeekWindow, WeeklyReport,
};
use neofeed_durable::{
    CronTick, Event, FanOut, RetryPolicy, StepContext, StepError, Workflow, WorkflowError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::PipelineDeps;
use crate::events::{ReportGenerateRequest, REPORT_GENERATE};

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerOutput {
    pub week_start: DateTime<Utc>,
    pub targets: usize,
    pub fan_out: FanOut,
}

pub struct WeeklySchedulerWorkflow {
    deps: PipelineDeps,
    retry: RetryPolicy,
}

impl WeeklySchedulerWorkflow {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Workflow for WeeklySchedulerWorkflow {
    const NAME: &'static str = "weekly-report-scheduler";
    type Input = CronTick;
    type Output = SchedulerOutput;

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    async fn run(&self, ctx: &StepContext, tick: CronTick) -> Result<SchedulerOutput, WorkflowError> {
        let users = self.deps.users.clone();
        let targets: Vec<Uuid> = ctx
            .step("list-targets", |_| async move {
                Ok(users
                    .list_report_targets()
                    .await?
                    .into_iter()
                    .map(|target| target.user_id)
                    .collect())
            })
            .await?;

        let week_start = WeekWindow::previous_iso_week(tick.scheduled_at).start;
        let events = targets
            .iter()
            .map(|&user_id| {
                let request = ReportGenerateRequest {
                    user_id,
                    week_start,
                };
                Event::from_data(REPORT_GENERATE, &request)
                    .map(|e| e.with_dedupe_key(request.dedupe_key()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WorkflowError::Unexpected(format!("event payload: {e}")))?;

        let fan_out = ctx.send_events("fan-out", events).await?;
        info!(
            %week_start,
            targets = targets.len(),
            started = fan_out.started,
            "weekly reports scheduled"
        );
        Ok(SchedulerOutput {
            week_start,
            targets: targets.len(),
            fan_out,
        })
    }
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSkipReason {
    /// Reports disabled or channel removed since the fan-out
    NoChannel,
    /// Nothing captured that week
    NoItems,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOutput {
    pub user_id: Uuid,
    pub week_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<ReportSkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<Uuid>,
    pub items: usize,
}

impl ReportOutput {
    fn skipped(request: &ReportGenerateRequest, reason: ReportSkipReason) -> Self {
        Self {
            user_id: request.user_id,
            week_start: request.week_start,
            skipped: Some(reason),
            report_id: None,
            items: 0,
        }
    }
}

pub struct WeeklyReportWorkflow {
    deps: PipelineDeps,
    retry: RetryPolicy,
}

impl WeeklyReportWorkflow {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Workflow for WeeklyReportWorkflow {
    const NAME: &'static str = "weekly-report-generator";
    type Input = ReportGenerateRequest;
    type Output = ReportOutput;

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    async fn run(
        &self,
        ctx: &StepContext,
        request: ReportGenerateRequest,
    ) -> Result<ReportOutput, WorkflowError> {
        let user_id = request.user_id;
        let window = request.window();

        let users = self.deps.users.clone();
        let channel: Option<NotificationChannel> = ctx
            .step("load-profile", |_| async move {
                Ok(users
                    .get_user(user_id)
                    .await?
                    .and_then(|profile| profile.report_target())
                    .map(|target| target.channel))
            })
            .await?;
        let Some(channel) = channel else {
            info!(%user_id, "weekly report skipped, no notification channel");
            return Ok(ReportOutput::skipped(&request, ReportSkipReason::NoChannel));
        };

        let feeds = self.deps.feeds.clone();
        let records: Vec<FeedRecord> = ctx
            .step("query-feeds", |_| async move {
                Ok(feeds.query_feeds(user_id, window.range()).await?)
            })
            .await?;

        let for_digest = records.clone();
        let digest: Digest = ctx
            .step("build-digest", |_| async move { Ok(Digest::build(window, &for_digest)) })
            .await?;
        if digest.is_empty() {
            info!(%user_id, week = %window.label(), "weekly report skipped, no items");
            return Ok(ReportOutput::skipped(&request, ReportSkipReason::NoItems));
        }

        // AI config is read inside the step; API keys stay out of step results
        let users = self.deps.users.clone();
        let summarizer = self.deps.summarizer.clone();
        let range = window.range();
        let narrated = ctx
            .step("narrate", |_| async move {
                let ai_config = users
                    .get_user(user_id)
                    .await?
                    .and_then(|profile| profile.ai_config);
                let mut items: Vec<FeedRecord> = records
                    .into_iter()
                    .filter(|r| range.contains(r.created_at))
                    .collect();
                items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(summarizer.narrate_week(&items, ai_config.as_ref()).await?)
            })
            .await;
        let narrative: Option<String> = match narrated {
            Ok(text) => Some(text),
            Err(WorkflowError::StepFailed { error, .. }) => {
                warn!(%user_id, error = %error, "weekly narrative unavailable, sending plain digest");
                None
            }
            Err(other) => return Err(other),
        };

        let for_render = digest.clone();
        let rendered: RenderedReport = ctx
            .step("render", |_| async move {
                RenderedReport::render(&for_render, narrative.as_deref())
                    .map_err(|e| StepError::permanent(format!("rendering report: {e}")))
            })
            .await?;

        let reports = self.deps.reports.clone();
        let items = digest.total_items;
        let report = WeeklyReport::new(user_id, digest, rendered.clone());
        let saved: WeeklyReport = ctx
            .step("save-report", |_| async move { Ok(reports.save_report(report).await?) })
            .await?;

        let notifier = self.deps.notifier.clone();
        let delivery_channel = channel.clone();
        ctx.step("deliver", |attempt| async move {
            let key = attempt.idempotency_key();
            if let Err(error) = notifier
                .deliver(user_id, &delivery_channel, &rendered, &key)
                .await
            {
                warn!(%user_id, attempt = attempt.attempt, %error, "report delivery failed");
                return Err(error.into());
            }
            Ok(())
        })
        .await?;

        info!(%user_id, report_id = %saved.id, channel = channel.kind(), items, "weekly report delivered");
        Ok(ReportOutput {
            user_id,
            week_start: request.week_start,
            skipped: None,
            report_id: Some(saved.id),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::{Duration, TimeZone};
    use neofeed_core::traits::ReportStore;
    use neofeed_core::{
        AiConfig, Category, DeliveryError, FeedSource, NewFeed, SummarizeError, Summary,
        UserProfile,
    };
    use neofeed_durable::RunOutcome;

    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap()
    }

    fn email(user: &str) -> NotificationChannel {
        NotificationChannel::Email {
            address: format!("{user}@example.com"),
        }
    }

    fn record(user_id: Uuid, title: &str, created_at: DateTime<Utc>) -> FeedRecord {
        let summary = Summary {
            title: title.to_string(),
            summary: format!("{title} summary"),
            takeaways: Vec::new(),
            category: Category::Tech,
            tags: vec!["rust".to_string()],
            reading_time_minutes: Some(1),
        };
        NewFeed::enriched(None, title.to_string(), summary, FeedSource::Capture, created_at)
            .into_record(Uuid::now_v7(), user_id, neofeed_core::content_fingerprint(title))
    }

    fn generate(user_id: Uuid) -> serde_json::Value {
        serde_json::to_value(ReportGenerateRequest {
            user_id,
            week_start: monday(),
        })
        .unwrap()
    }

    fn output(outcome: RunOutcome) -> ReportOutput {
        match outcome {
            RunOutcome::Completed { output } => serde_json::from_value(output).unwrap(),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_report_includes_only_items_inside_week() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.users
            .upsert(UserProfile::new(user_id).with_weekly_report(email("u1")))
            .await;
        for (title, at) in [
            ("before", monday() - Duration::hours(1)),
            ("first", monday()),
            ("middle", monday() + Duration::days(3)),
            ("after", monday() + Duration::weeks(1)),
        ] {
            h.feeds.seed(record(user_id, title, at)).await;
        }

        let out = output(
            h.executor
                .execute(WeeklyReportWorkflow::NAME, generate(user_id))
                .await
                .unwrap()
                .outcome,
        );

        assert_eq!(out.skipped, None);
        assert_eq!(out.items, 2);
        let reports = h.reports.list_reports(user_id).await.unwrap();
        assert_eq!(reports.len(), 1);
        let titles: Vec<_> = reports[0]
            .digest
            .highlights
            .iter()
            .map(|h| h.title.as_str())
            .collect();
        assert_eq!(titles, vec!["middle", "first"]);

        let deliveries = h.notifier.deliveries().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].channel, email("u1"));
    }

    #[tokio::test]
    async fn test_report_opens_with_narrative_from_user_model() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        let config = AiConfig {
            model: Some("weekly-model".to_string()),
            insight_prompt: Some("Be brief.".to_string()),
            ..Default::default()
        };
        h.users
            .upsert(
                UserProfile::new(user_id)
                    .with_weekly_report(email("u1"))
                    .with_ai_config(config.clone()),
            )
            .await;
        h.feeds.seed(record(user_id, "first", monday())).await;
        h.feeds
            .seed(record(user_id, "middle", monday() + Duration::days(3)))
            .await;

        let out = output(
            h.executor
                .execute(WeeklyReportWorkflow::NAME, generate(user_id))
                .await
                .unwrap()
                .outcome,
        );

        assert_eq!(out.items, 2);
        assert_eq!(h.summarizer.narrations().await, vec![Some(config)]);
        let report = &h.reports.list_reports(user_id).await.unwrap()[0];
        assert!(report
            .markdown
            .contains("## This week\n\nYou saved 2 items this week: middle, first.\n"));
        assert!(report.html.contains("<p>You saved 2 items this week: middle, first.</p>"));
        assert_eq!(h.notifier.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_narrative_falls_back_to_plain_digest() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.users
            .upsert(UserProfile::new(user_id).with_weekly_report(email("u1")))
            .await;
        h.feeds.seed(record(user_id, "first", monday())).await;
        h.summarizer
            .fail_narration(SummarizeError::Configuration("no summarizer API key".to_string()))
            .await;

        let run_id = h
            .executor
            .execute(WeeklyReportWorkflow::NAME, generate(user_id))
            .await
            .unwrap()
            .run_id;
        h.executor.run_until_idle().await.unwrap();

        let run = h.executor.get_run(run_id).await.unwrap();
        assert_eq!(run.status, neofeed_durable::RunStatus::Completed);
        let report = &h.reports.list_reports(user_id).await.unwrap()[0];
        assert!(!report.markdown.contains("## This week"));
        assert!(report.markdown.contains("### 1. first"));
        assert_eq!(h.notifier.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_week_is_skipped_without_delivery() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.users
            .upsert(UserProfile::new(user_id).with_weekly_report(email("u1")))
            .await;

        let out = output(
            h.executor
                .execute(WeeklyReportWorkflow::NAME, generate(user_id))
                .await
                .unwrap()
                .outcome,
        );

        assert_eq!(out.skipped, Some(ReportSkipReason::NoItems));
        assert!(h.notifier.deliveries().await.is_empty());
        assert!(h.reports.list_reports(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_removed_after_fan_out_is_skipped() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.feeds.seed(record(user_id, "first", monday())).await;

        let out = output(
            h.executor
                .execute(WeeklyReportWorkflow::NAME, generate(user_id))
                .await
                .unwrap()
                .outcome,
        );

        assert_eq!(out.skipped, Some(ReportSkipReason::NoChannel));
        assert_eq!(h.notifier.attempts().await, 0);
    }

    #[tokio::test]
    async fn test_delivery_retry_reuses_idempotency_key() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.users
            .upsert(UserProfile::new(user_id).with_weekly_report(email("u1")))
            .await;
        h.feeds.seed(record(user_id, "first", monday())).await;
        h.notifier
            .fail_next(DeliveryError::Unavailable("HTTP 502".to_string()), 1)
            .await;

        let run_id = h
            .executor
            .execute(WeeklyReportWorkflow::NAME, generate(user_id))
            .await
            .unwrap()
            .run_id;
        h.executor.run_until_idle().await.unwrap();

        assert_eq!(h.notifier.attempts().await, 2);
        let deliveries = h.notifier.deliveries().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].idempotency_key, format!("{run_id}:deliver"));
        assert_eq!(h.reports.list_reports(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_fans_out_eligible_users_once_per_week() {
        let h = Harness::new().await;
        let eligible = Uuid::now_v7();
        let ai_only = Uuid::now_v7();
        h.users
            .upsert(UserProfile::new(eligible).with_weekly_report(email("u1")))
            .await;
        h.users
            .upsert(UserProfile::new(ai_only).with_ai_config(Default::default()))
            .await;

        let tick = monday() + Duration::days(7) + Duration::hours(8);
        let first = h
            .router
            .fire_cron_at(WeeklySchedulerWorkflow::NAME, tick)
            .await
            .unwrap();
        h.executor.drive(first.run_ids()[0]).await.unwrap();

        let second = h
            .router
            .fire_cron_at(WeeklySchedulerWorkflow::NAME, tick + Duration::minutes(1))
            .await
            .unwrap();
        let outcome = h.executor.drive(second.run_ids()[0]).await.unwrap();
        let RunOutcome::Completed { output } = outcome else {
            panic!("scheduler did not complete: {outcome:?}");
        };
        let out: SchedulerOutput = serde_json::from_value(output).unwrap();

        assert_eq!(out.week_start, monday());
        assert_eq!(out.targets, 1);
        assert_eq!(out.fan_out.started, 0);
        assert_eq!(out.fan_out.deduplicated, 1);
    }
}
