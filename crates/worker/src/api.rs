// Trigger API
//
// The operations the rest of the product calls: submit a capture, trigger a
// weekly report by hand, and inspect or cancel runs. The HTTP layer in
// http.rs is a thin wrapper over this type.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use neofeed_core::{capture_dedupe_key, CaptureInput};
use neofeed_durable::{
    EmitReceipt, Event, EventRouter, EventSink, ExecutorError, RouterError, RunFilter, RunStatus,
    StepOutcome, StepRecord, WorkflowExecutor, WorkflowRun,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::events::{FeedProcessRequest, ReportGenerateRequest, FEED_PROCESS, REPORT_GENERATE};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Rejected before anything was enqueued
    #[error("invalid capture: {0}")]
    InvalidCapture(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Executor(ExecutorError),
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::RunNotFound(id) => Self::RunNotFound(id),
            other => Self::Executor(other),
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// Runs started (or reused) by a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CaptureAccepted {
    pub event_id: Uuid,
    pub run_ids: Vec<Uuid>,
    /// True when an identical capture is still in flight or completed recently
    pub deduplicated: bool,
}

impl From<EmitReceipt> for CaptureAccepted {
    fn from(receipt: EmitReceipt) -> Self {
        Self {
            event_id: receipt.event_id,
            run_ids: receipt.run_ids(),
            deduplicated: receipt.deduplicated().next().is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReportTriggered {
    pub event_id: Uuid,
    pub run_ids: Vec<Uuid>,
    pub week_start: DateTime<Utc>,
}

/// A workflow run as exposed over the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunView {
    pub id: Uuid,
    pub workflow: String,
    pub event: String,
    #[schema(example = "completed")]
    pub status: String,
    pub steps_completed: u32,
    pub attempts: u32,
    pub wake_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<WorkflowRun> for RunView {
    fn from(run: WorkflowRun) -> Self {
        Self {
            id: run.id,
            workflow: run.workflow_name,
            event: run.event.name,
            status: run.status.as_str().to_string(),
            steps_completed: run.current_step_index,
            attempts: run.current_step_attempts,
            wake_at: run.wake_at,
            cancel_requested: run.cancel_requested,
            output: run.output,
            error: run.error,
            created_at: run.created_at,
            updated_at: run.updated_at,
            completed_at: run.completed_at,
        }
    }
}

/// A memoized step result
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepView {
    pub name: String,
    pub index: u32,
    #[schema(example = "succeeded")]
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl From<StepRecord> for StepView {
    fn from(record: StepRecord) -> Self {
        let (status, output, error) = match record.outcome {
            StepOutcome::Succeeded { output } => ("succeeded", Some(output), None),
            StepOutcome::Failed { error } => ("failed", None, Some(error.to_string())),
        };
        Self {
            name: record.step_name,
            index: record.step_index,
            status: status.to_string(),
            output,
            error,
            attempts: record.attempts,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: RunView,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub id: Uuid,
    /// Status after the request; a run mid-step stays `running` until its
    /// current step finishes
    pub status: String,
}

/// Query for listing runs
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RunQuery {
    /// Workflow name, e.g. `feed-ingest`
    pub workflow: Option<String>,
    /// One of pending, running, sleeping, completed, failed, cancelled
    pub status: Option<String>,
    /// Defaults to 50, capped at 500
    pub limit: Option<usize>,
}

impl RunQuery {
    fn into_filter(self) -> Result<RunFilter, ApiError> {
        let mut filter = RunFilter::default().limit(
            self.limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
        );
        if let Some(workflow) = self.workflow.filter(|w| !w.is_empty()) {
            filter = filter.workflow(workflow);
        }
        if let Some(status) = self.status.filter(|s| !s.is_empty()) {
            let status: RunStatus = status
                .parse()
                .map_err(|_| ApiError::InvalidFilter(format!("unknown status '{status}'")))?;
            filter = filter.status(status);
        }
        Ok(filter)
    }
}

// ============================================================================
// PipelineApi
// ============================================================================

#[derive(Clone)]
pub struct PipelineApi {
    router: Arc<EventRouter>,
    executor: Arc<WorkflowExecutor>,
}

impl PipelineApi {
    pub fn new(router: Arc<EventRouter>, executor: Arc<WorkflowExecutor>) -> Self {
        Self { router, executor }
    }

    /// Enqueue `feed.process` for a capture. Resubmitting the same URL while
    /// its ingestion is active (or recently completed) reuses that run.
    #[instrument(skip(self, capture))]
    pub async fn submit_capture(
        &self,
        user_id: Uuid,
        capture: CaptureInput,
    ) -> Result<CaptureAccepted, ApiError> {
        let (capture, dedupe_key) = match capture {
            CaptureInput::Url { url } => {
                let url = validate_url(&url)?;
                let key = capture_dedupe_key(user_id, &url);
                (CaptureInput::url(url), Some(key))
            }
            CaptureInput::Text { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(ApiError::InvalidCapture("empty text".to_string()));
                }
                (CaptureInput::text(text), None)
            }
        };

        let request = FeedProcessRequest::capture(user_id, capture);
        let mut event = Event::from_data(FEED_PROCESS, &request)
            .map_err(|e| ApiError::InvalidCapture(e.to_string()))?;
        if let Some(key) = dedupe_key {
            event = event.with_dedupe_key(key);
        }

        let accepted = CaptureAccepted::from(self.router.emit(event).await?);
        info!(%user_id, runs = accepted.run_ids.len(), deduplicated = accepted.deduplicated, "capture accepted");
        Ok(accepted)
    }

    /// Emit `report.generate` for the seven days before now. No dedupe key,
    /// so every manual trigger runs.
    #[instrument(skip(self))]
    pub async fn trigger_weekly_report_now(&self, user_id: Uuid) -> Result<ReportTriggered, ApiError> {
        let week_start = (Utc::now() - Duration::days(7)).trunc_subsecs(0);
        let request = ReportGenerateRequest {
            user_id,
            week_start,
        };
        let event = Event::from_data(REPORT_GENERATE, &request)
            .map_err(|e| ApiError::InvalidCapture(e.to_string()))?;
        let receipt = self.router.emit(event).await?;
        info!(%user_id, %week_start, "weekly report triggered manually");
        Ok(ReportTriggered {
            event_id: receipt.event_id,
            run_ids: receipt.run_ids(),
            week_start,
        })
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<RunDetail, ApiError> {
        let run = self.executor.get_run(run_id).await?;
        let steps = self.executor.step_results(run_id).await?;
        Ok(RunDetail {
            run: run.into(),
            steps: steps.into_iter().map(StepView::from).collect(),
        })
    }

    pub async fn list_runs(&self, query: RunQuery) -> Result<Vec<RunView>, ApiError> {
        let filter = query.into_filter()?;
        let runs = self.executor.list_runs(&filter).await?;
        Ok(runs.into_iter().map(RunView::from).collect())
    }

    pub async fn cancel_run(&self, run_id: Uuid) -> Result<CancelResponse, ApiError> {
        let status = self.executor.cancel(run_id).await?;
        Ok(CancelResponse {
            id: run_id,
            status: status.as_str().to_string(),
        })
    }
}

/// Absolute http(s) URL with a host, normalised by the url crate
fn validate_url(raw: &str) -> Result<String, ApiError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ApiError::InvalidCapture(format!("malformed URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::InvalidCapture(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ApiError::InvalidCapture("URL has no host".to_string()));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use crate::workflows::{FeedIngestWorkflow, WeeklyReportWorkflow};
    use neofeed_core::FetchedContent;
    use neofeed_durable::Workflow;

    fn api(h: &Harness) -> PipelineApi {
        PipelineApi::new(h.router.clone(), h.executor.clone())
    }

    #[tokio::test]
    async fn test_malformed_url_is_rejected_before_enqueue() {
        let h = Harness::new().await;
        let api = api(&h);
        for bad in ["not a url", "ftp://files.example/a", "mailto:someone@example.com"] {
            let result = api.submit_capture(Uuid::now_v7(), CaptureInput::url(bad)).await;
            assert!(matches!(result, Err(ApiError::InvalidCapture(_))), "{bad}");
        }
        assert!(api
            .submit_capture(Uuid::now_v7(), CaptureInput::text("   "))
            .await
            .is_err());
        assert!(h.executor.list_runs(&RunFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resubmitted_url_reuses_run() {
        let h = Harness::new().await;
        let api = api(&h);
        let user_id = Uuid::now_v7();

        let first = api
            .submit_capture(user_id, CaptureInput::url("https://a.example/x"))
            .await
            .unwrap();
        let second = api
            .submit_capture(user_id, CaptureInput::url(" https://a.example/x "))
            .await
            .unwrap();
        let other_user = api
            .submit_capture(Uuid::now_v7(), CaptureInput::url("https://a.example/x"))
            .await
            .unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.run_ids, second.run_ids);
        assert_ne!(first.run_ids, other_user.run_ids);
    }

    #[tokio::test]
    async fn test_get_run_includes_steps() {
        let h = Harness::new().await;
        h.fetcher
            .set_page("https://a.example/x", FetchedContent::text("hello world"))
            .await;
        let api = api(&h);
        let accepted = api
            .submit_capture(Uuid::now_v7(), CaptureInput::url("https://a.example/x"))
            .await
            .unwrap();
        h.executor.run_until_idle().await.unwrap();

        let detail = api.get_run(accepted.run_ids[0]).await.unwrap();
        assert_eq!(detail.run.workflow, FeedIngestWorkflow::NAME);
        assert_eq!(detail.run.status, "completed");
        let steps: Vec<_> = detail.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(steps, vec!["fetch", "dedupe-check", "summarize", "persist"]);

        assert!(matches!(
            api.get_run(Uuid::now_v7()).await,
            Err(ApiError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_report_trigger_is_never_deduplicated() {
        let h = Harness::new().await;
        let api = api(&h);
        let user_id = Uuid::now_v7();

        let first = api.trigger_weekly_report_now(user_id).await.unwrap();
        let second = api.trigger_weekly_report_now(user_id).await.unwrap();

        assert_ne!(first.run_ids, second.run_ids);
        let runs = api
            .list_runs(RunQuery {
                workflow: Some(WeeklyReportWorkflow::NAME.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status_and_cancel_works() {
        let h = Harness::new().await;
        let api = api(&h);
        assert!(matches!(
            api.list_runs(RunQuery {
                status: Some("exploded".to_string()),
                ..Default::default()
            })
            .await,
            Err(ApiError::InvalidFilter(_))
        ));

        let accepted = api
            .submit_capture(Uuid::now_v7(), CaptureInput::url("https://a.example/x"))
            .await
            .unwrap();
        let cancelled = api.cancel_run(accepted.run_ids[0]).await.unwrap();
        assert_eq!(cancelled.status, "cancelled");
    }
}
