//! HTTP handlers for the reply webhook and the inspection endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use nudge_escalation::{
    policy::PolicyView, EngineError, EngineMetricsSnapshot, InterruptOutcome, Priority,
    ReplyEvent, TaskSnapshot, TimingPreview,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;

/// Error body: `{"error": <kind>, "message": <detail>}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::InvalidPriority(_)
            | EngineError::InvalidLadder { .. }
            | EngineError::InvalidMultiplier(_)
            | EngineError::MalformedAction(_) => StatusCode::BAD_REQUEST,
            EngineError::UnknownTask(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidTransition { .. } | EngineError::AlreadyTracked(_) => {
                StatusCode::CONFLICT
            }
            EngineError::Persistence { .. } => {
                warn!(error = %err, "Request failed on persistence");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.kind, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Replies
// =============================================================================

pub async fn post_reply(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReplyEvent>, JsonRejection>,
) -> ApiResult<Json<InterruptOutcome>> {
    let Json(event) = payload?;
    let outcome = state.engine.handle_reply(&event).await?;
    Ok(Json(outcome))
}

// =============================================================================
// Policy
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub tick_interval_secs: u64,
    pub snooze_secs: u64,
    pub default_multiplier: f64,
    pub policies: Vec<PolicyView>,
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let config = state.engine.config();
    Json(ConfigResponse {
        tick_interval_secs: config.tick_interval_secs,
        snooze_secs: config.snooze_secs,
        default_multiplier: config.default_multiplier,
        policies: state.engine.policy().describe(),
    })
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub priority: String,
    pub multiplier: Option<f64>,
}

pub async fn get_preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<TimingPreview>> {
    let priority: Priority = query.priority.parse()?;
    Ok(Json(state.engine.preview(priority, query.multiplier)?))
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Generated when absent
    pub id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub priority: String,
    pub escalation_speed_multiplier: Option<f64>,
}

pub async fn post_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TaskSnapshot>)> {
    let Json(request) = payload?;
    let priority: Priority = request.priority.parse()?;
    let id = request
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let multiplier = request
        .escalation_speed_multiplier
        .unwrap_or(state.engine.config().default_multiplier);
    let snapshot = TaskSnapshot::new(id, request.scheduled_at, priority).with_multiplier(multiplier);
    let tracked = state.engine.track_new(snapshot).await?;
    Ok((StatusCode::CREATED, Json(tracked)))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskSnapshot>> {
    state
        .engine
        .task(&id)
        .await
        .map(Json)
        .ok_or_else(|| EngineError::UnknownTask(id).into())
}

// =============================================================================
// Operations
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub tracked_tasks: usize,
    #[serde(flatten)]
    pub counters: EngineMetricsSnapshot,
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        tracked_tasks: state.engine.tracker().len(),
        counters: state.engine.metrics().snapshot(),
    })
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "tracked_tasks": state.engine.tracker().len(),
    }))
}
