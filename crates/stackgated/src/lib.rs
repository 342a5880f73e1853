//! stackgated - HTTP surface of the pipeline orchestrator
//!
//! Routes:
//!
//! | Method | Path                       | Purpose                                  |
//! |--------|----------------------------|------------------------------------------|
//! | POST   | `/webhook`                 | signed change notifications              |
//! | GET    | `/executions`              | list by `commit`, `branch`, `outcome`    |
//! | POST   | `/executions`              | manual trigger on an explicit commit     |
//! | GET    | `/executions/:id`          | one execution, full document             |
//! | POST   | `/executions/:id/cancel`   | request cancellation                     |
//! | GET    | `/healthz`                 | liveness                                 |
//!
//! Every request that can create or change an execution is signed with the
//! webhook secret in `x-hub-signature-256`: deliveries and manual triggers
//! sign the raw body, cancel requests sign the execution id. Unsigned or
//! mis-signed requests get 401 and leave no record.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use stackgate_ci::trigger::{DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use stackgate_ci::{Pipeline, TriggerDecision, TriggerError, TriggerListener, WebhookHeaders};
use stackgate_core::{is_commit_sha, PipelineError, PipelineExecution, SourceRef, TriggerEvent};
use stackgate_state::{ExecutionId, ExecutionQuery, StorageError};
use tracing::{error, info};

/// Upper bound on `limit` for list queries.
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    listener: Arc<TriggerListener>,
    repository: String,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        listener: TriggerListener,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            listener: Arc::new(listener),
            repository: repository.into(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/webhook", post(webhook_handler))
        .route(
            "/executions",
            get(list_executions_handler).post(manual_trigger_handler),
        )
        .route("/executions/:id", get(get_execution_handler))
        .route("/executions/:id/cancel", post(cancel_execution_handler))
        .with_state(state)
}

/// Handler errors, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("execution {0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Storage(StorageError::ExecutionNotFound { execution_id }) => {
                ApiError::NotFound(execution_id)
            }
            other => ApiError::Pipeline(other),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Trigger(TriggerError::Authentication(_))
            | ApiError::Trigger(TriggerError::MissingHeader(SIGNATURE_HEADER)) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Trigger(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Row returned by the list endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub trigger: String,
    pub repository: String,
    pub branch: String,
    pub commit_sha: String,
    pub state: String,
    pub outcome: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&PipelineExecution> for ExecutionSummary {
    fn from(execution: &PipelineExecution) -> Self {
        let source = &execution.trigger().source;
        Self {
            execution_id: execution.id().to_string(),
            trigger: execution.trigger().kind.as_str().to_string(),
            repository: source.repository.clone(),
            branch: source.branch.clone(),
            commit_sha: source.commit_sha.clone(),
            state: execution.state().as_str().to_string(),
            outcome: execution.outcome().map(|o| o.as_str().to_string()),
            error: execution.error().map(str::to_string),
            created_at: execution.created_at(),
            finished_at: execution.finished_at(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub outcome: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn to_query(&self) -> ExecutionQuery {
        let mut query = ExecutionQuery::all();
        if let Some(commit) = &self.commit {
            query = query.with_commit(commit.clone());
        }
        if let Some(branch) = &self.branch {
            query = query.with_branch(branch.clone());
        }
        if let Some(outcome) = &self.outcome {
            query = query.with_outcome(outcome.clone());
        }
        query.with_limit(self.limit.unwrap_or(50).min(MAX_LIST_LIMIT))
    }
}

/// Body of a manual trigger.
#[derive(Debug, Serialize, Deserialize)]
pub struct ManualTrigger {
    pub commit: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn webhook_headers(headers: &HeaderMap) -> WebhookHeaders {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    WebhookHeaders {
        event: value(EVENT_HEADER),
        signature: signature(headers).map(str::to_string),
        delivery: value(DELIVERY_HEADER),
    }
}

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let decision = state.listener.accept(&webhook_headers(&headers), &body)?;
    match decision {
        TriggerDecision::Ignored(reason) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": reason })),
        )
            .into_response()),
        TriggerDecision::Start(trigger) => accept(&state, trigger).await,
    }
}

async fn accept(state: &AppState, trigger: TriggerEvent) -> Result<Response, ApiError> {
    let handle = state.pipeline.start(trigger).await?;
    info!(execution_id = %handle.id, "execution accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "execution_id": handle.id.to_string() })),
    )
        .into_response())
}

fn signature(headers: &HeaderMap) -> Option<&str> {
    headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok())
}

async fn manual_trigger_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.listener.authenticate(signature(&headers), &body)?;
    let request: ManualTrigger = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid manual trigger: {e}")))?;

    let commit = request.commit.trim();
    if !is_commit_sha(commit) {
        return Err(ApiError::BadRequest(format!(
            "{commit:?} is not a commit id (7 to 64 hex digits)"
        )));
    }
    let source = SourceRef::new(state.repository.clone(), request.branch.clone(), commit);
    accept(&state, TriggerEvent::manual(source)).await
}

async fn list_executions_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ExecutionSummary>>, ApiError> {
    let executions = state.pipeline.list(&params.to_query()).await?;
    Ok(Json(executions.iter().map(ExecutionSummary::from).collect()))
}

async fn get_execution_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineExecution>, ApiError> {
    let execution = state.pipeline.execution(&ExecutionId(id)).await?;
    Ok(Json(execution))
}

async fn cancel_execution_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.listener.authenticate(signature(&headers), id.as_bytes())?;
    let id = ExecutionId(id);
    if state.pipeline.cancel(&id).await? {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "cancelling", "execution_id": id.to_string() })),
        )
            .into_response())
    } else {
        Ok((
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("execution {id} already finished") })),
        )
            .into_response())
    }
}
