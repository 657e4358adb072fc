// HTTP surface for the trigger API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use neofeed_core::CaptureInput;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::api::{
    ApiError, CancelResponse, CaptureAccepted, PipelineApi, ReportTriggered, RunDetail, RunQuery,
    RunView, StepView,
};

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Response wrapper for list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CaptureRequest {
    pub user_id: Uuid,
    pub capture: CaptureInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WeeklyReportRequest {
    pub user_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn error_response(err: ApiError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        ApiError::InvalidCapture(_) | ApiError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
        ApiError::RunNotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Router(_) | ApiError::Executor(_) => {
            tracing::error!(error = %err, "trigger API request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    ErrorResponse::new(err.to_string()).into_response(status)
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        submit_capture,
        trigger_weekly_report,
        list_runs,
        get_run,
        cancel_run,
    ),
    components(
        schemas(
            CaptureRequest, CaptureInput, CaptureAccepted,
            WeeklyReportRequest, ReportTriggered,
            RunView, StepView, RunDetail, CancelResponse,
            ErrorResponse, HealthResponse,
        )
    ),
    tags(
        (name = "captures", description = "Content capture"),
        (name = "reports", description = "Weekly reports"),
        (name = "runs", description = "Workflow run inspection")
    )
)]
pub struct ApiDoc;

/// Create the HTTP router
pub fn routes(api: PipelineApi) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/captures", post(submit_capture))
        .route("/v1/reports/weekly", post(trigger_weekly_report))
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/:run_id", get(get_run))
        .route("/v1/runs/:run_id/cancel", post(cancel_run))
        .route("/api-doc/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/v1/captures",
    request_body = CaptureRequest,
    responses(
        (status = 202, description = "Capture enqueued", body = CaptureAccepted),
        (status = 400, description = "Malformed capture", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "captures"
)]
pub async fn submit_capture(
    State(api): State<PipelineApi>,
    Json(req): Json<CaptureRequest>,
) -> ApiResult<(StatusCode, Json<CaptureAccepted>)> {
    let accepted = api
        .submit_capture(req.user_id, req.capture)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[utoipa::path(
    post,
    path = "/v1/reports/weekly",
    request_body = WeeklyReportRequest,
    responses(
        (status = 202, description = "Report generation enqueued", body = ReportTriggered),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn trigger_weekly_report(
    State(api): State<PipelineApi>,
    Json(req): Json<WeeklyReportRequest>,
) -> ApiResult<(StatusCode, Json<ReportTriggered>)> {
    let triggered = api
        .trigger_weekly_report_now(req.user_id)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(triggered)))
}

#[utoipa::path(
    get,
    path = "/v1/runs",
    params(RunQuery),
    responses(
        (status = 200, description = "Runs, newest first", body = ListResponse<RunView>),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn list_runs(
    State(api): State<PipelineApi>,
    Query(query): Query<RunQuery>,
) -> ApiResult<Json<ListResponse<RunView>>> {
    let runs = api.list_runs(query).await.map_err(error_response)?;
    Ok(Json(runs.into()))
}

#[utoipa::path(
    get,
    path = "/v1/runs/{run_id}",
    params(("run_id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Run with its step results", body = RunDetail),
        (status = 404, description = "Run not found", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(api): State<PipelineApi>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunDetail>> {
    api.get_run(run_id).await.map(Json).map_err(error_response)
}

#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/cancel",
    params(("run_id" = Uuid, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Cancellation requested", body = CancelResponse),
        (status = 404, description = "Run not found", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn cancel_run(
    State(api): State<PipelineApi>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    api.cancel_run(run_id).await.map(Json).map_err(error_response)
}
