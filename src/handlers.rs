// src/handlers.rs
//! Run control endpoints - trigger, inspect, resume, archive

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::{ApprovalDecision, Run, RunKind};
use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Deserialize)]
pub struct WeeklyTriggerRequest {
    /// ISO-week period key, e.g. "2026-W35".
    pub period_key: String,
}

#[derive(Deserialize)]
pub struct OnDemandRequest {
    pub article_url: String,
}

#[derive(Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub stage: String,
    pub run: Run,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            stage: run.stage.to_string(),
            run,
        }
    }
}

fn error_response(e: EngineError) -> axum::response::Response {
    let status = match &e {
        EngineError::RunNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState { .. }
        | EngineError::Conflict(_)
        | EngineError::PeriodBlocked(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("request failed: {}", e);
    }
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// POST /api/briefings - trigger (or idempotently re-trigger) a weekly run
pub async fn trigger_weekly(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<WeeklyTriggerRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .create_or_resume(RunKind::Weekly, &request.period_key)
        .await
    {
        Ok(run) => (StatusCode::OK, Json(RunResponse::from(run))).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/ondemand - trigger a single-article run
pub async fn trigger_on_demand(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<OnDemandRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .create_or_resume(RunKind::OnDemand, &request.article_url)
        .await
    {
        Ok(run) => (StatusCode::OK, Json(RunResponse::from(run))).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/runs/:run_id - latest checkpointed state of a run
pub async fn get_run(
    Path(run_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    match state.orchestrator.get_run(&run_id).await {
        Ok(run) => (StatusCode::OK, Json(RunResponse::from(run))).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/runs/:run_id/resume - feed a gate decision into a suspended run
pub async fn resume_run(
    Path(run_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Json(decision): Json<ApprovalDecision>,
) -> impl IntoResponse {
    match state.orchestrator.resume(&run_id, decision).await {
        Ok(run) => (StatusCode::OK, Json(RunResponse::from(run))).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/runs/:run_id/archive - unblock the period key of a terminal run
pub async fn archive_run(
    Path(run_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    match state.orchestrator.archive(&run_id).await {
        Ok(run) => (StatusCode::OK, Json(RunResponse::from(run))).into_response(),
        Err(e) => error_response(e),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/briefings", post(trigger_weekly))
        .route("/api/ondemand", post(trigger_on_demand))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/resume", post(resume_run))
        .route("/api/runs/:run_id/archive", post(archive_run))
        .layer(Extension(state))
}
