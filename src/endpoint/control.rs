//! HTTP control plane (§6 "Control-plane endpoints"): session lifecycle,
//! pipeline lifecycle, and observability, alongside the streaming endpoint.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asr::AsrStreamConfig;
use crate::endpoint::AppState;
use crate::error::CoreError;
use crate::session::{Session, SessionError};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Every control-plane failure maps to one of the status codes in §6: 400
/// validation, 401 auth, 404 not found, 409 already in progress, 429
/// rate-limited, 500 internal, 503 draining.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Auth(String),
    NotFound(String),
    Conflict(String),
    RateLimited(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, "validation", m),
            ApiError::Auth(m) => (StatusCode::UNAUTHORIZED, "auth", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m),
            ApiError::RateLimited(m) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(m) => ApiError::Validation(m),
            CoreError::Auth(m) => ApiError::Auth(m),
            CoreError::TransientRemote { .. } | CoreError::ProviderDegraded { .. } => ApiError::Internal(err.to_string()),
            CoreError::Quota { .. } => ApiError::RateLimited(err.to_string()),
            CoreError::Cancelled => ApiError::Conflict(err.to_string()),
            CoreError::Internal(m) => ApiError::Internal(m),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => ApiError::NotFound("session not found".into()),
            SessionError::Expired => ApiError::NotFound("session expired".into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    context: serde_json::Value,
    #[serde(default = "default_ttl_minutes")]
    ttl_minutes: i64,
}

fn default_ttl_minutes() -> i64 {
    30
}

async fn create_session(State(state): State<AppState>, Json(req): Json<CreateSessionRequest>) -> Result<Json<Session>, ApiError> {
    if req.user_id.is_empty() {
        return Err(ApiError::Validation("userId must not be empty".into()));
    }
    let session = state.sessions.create_session(req.user_id, req.context, chrono::Duration::minutes(req.ttl_minutes));
    Ok(Json(session))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.get_session(id)?))
}

async fn end_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.sessions.end_session(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct StartPipelineRequest {
    session_id: Uuid,
    user_id: String,
    #[serde(default)]
    language_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartPipelineResponse {
    pipeline_id: Uuid,
}

async fn start_pipeline(State(state): State<AppState>, Json(req): Json<StartPipelineRequest>) -> Result<Json<StartPipelineResponse>, ApiError> {
    let config = AsrStreamConfig { language_code: req.language_code.unwrap_or_else(|| "en-US".to_string()), ..Default::default() };
    let (pipeline_id, _events) = state.orchestrator.start_pipeline(req.session_id, req.user_id, config).await?;
    Ok(Json(StartPipelineResponse { pipeline_id }))
}

#[derive(Debug, Serialize)]
struct PipelineStatusResponse {
    pipeline_id: Uuid,
    stage: Option<String>,
}

async fn pipeline_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<PipelineStatusResponse>, ApiError> {
    let stage = state.orchestrator.stage_of(id).map(|s| format!("{s:?}"));
    if stage.is_none() {
        return Err(ApiError::NotFound("pipeline not found".into()));
    }
    Ok(Json(PipelineStatusResponse { pipeline_id: id, stage }))
}

async fn interrupt_pipeline(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.interrupts.manual_interrupt(id, Instant::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn end_pipeline(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.orchestrator.end_pipeline(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct ActivePipelinesResponse {
    active_count: usize,
    pipeline_ids: Vec<Uuid>,
}

async fn list_active_pipelines(State(state): State<AppState>) -> Json<ActivePipelinesResponse> {
    Json(ActivePipelinesResponse { active_count: state.orchestrator.active_count(), pipeline_ids: state.orchestrator.active_ids() })
}

async fn latency_stats(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.latency.report();
    Json(serde_json::json!({
        "firstTokenLatency": report.first_token_latency.map(|s| serde_json::json!({
            "meanMs": s.mean_ms, "p50Ms": s.p50_ms, "p95Ms": s.p95_ms, "p99Ms": s.p99_ms, "count": s.count,
        })),
        "totalLatency": report.total_latency.map(|s| serde_json::json!({
            "meanMs": s.mean_ms, "p50Ms": s.p50_ms, "p95Ms": s.p95_ms, "p99Ms": s.p99_ms, "count": s.count,
        })),
        "slaMet": report.sla_met,
        "recommendations": report.recommendations,
    }))
}

/// Keyed by pipeline id, not session id: at most one pipeline is active per
/// session at a time (§5 ordering guarantee), so the most recent pipeline's
/// id is the natural handle for a session's interruption counters.
async fn interruption_stats(State(state): State<AppState>, Path(pipeline_id): Path<Uuid>) -> impl IntoResponse {
    let stats = state.interrupts.stats_for(pipeline_id);
    Json(serde_json::json!({
        "triggered": stats.triggered,
        "suppressedByCooldown": stats.suppressed_by_cooldown,
        "suppressedBelowThreshold": stats.suppressed_below_threshold,
    }))
}

async fn provider_health(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.asr_pool.manager().snapshot();
    let body: Vec<_> = providers
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "priority": p.priority,
                "healthy": p.healthy,
                "successCount": p.success_count,
                "errorCount": p.error_count,
                "confidenceEma": p.confidence_ema,
                "latencyEmaMs": p.latency_ema_ms,
                "qualityScore": p.quality_score(),
            })
        })
        .collect();
    Json(body)
}

async fn refresh_status(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.refresh.history().await;
    Json(serde_json::json!({
        "inProgress": state.refresh.in_progress(),
        "intervalSecs": state.refresh.interval().as_secs(),
        "history": history,
    }))
}

/// Control-plane routes only; the caller attaches these to the streaming
/// route and applies `with_state` once over the combined router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/{id}", get(get_session))
        .route("/v1/sessions/{id}/end", post(end_session))
        .route("/v1/pipelines", get(list_active_pipelines).post(start_pipeline))
        .route("/v1/pipelines/{id}", get(pipeline_status))
        .route("/v1/pipelines/{id}/interrupt", post(interrupt_pipeline))
        .route("/v1/pipelines/{id}/end", post(end_pipeline))
        .route("/v1/latency", get(latency_stats))
        .route("/v1/interruptions/{pipeline_id}", get(interruption_stats))
        .route("/v1/providers", get(provider_health))
        .route("/v1/refresh", get(refresh_status))
}
