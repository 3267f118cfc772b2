//! Admin API handlers

use super::AppState;
use crate::error::PipelineError;
use crate::jobs::{JobInfo, UpdateRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

type ApiError = (StatusCode, String);

fn internal(err: PipelineError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn latest_version(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let current = state.versions.current_release().await.map_err(internal)?;
    let body = match current {
        None => json!({ "release": null, "status": "unknown" }),
        Some(version) => json!({
            "release": version.release,
            "status": version.status,
            "finished_at": version.finished_at,
        }),
    };
    Ok(Json(body))
}

/// Enqueue an ingestion run and return its run id; the caller polls
/// `/updates/status` or `/updates/jobs/{run_id}` for progress.
pub async fn run_update(
    State(state): State<AppState>,
    payload: Option<Json<UpdateRequest>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let job = state
        .worker
        .enqueue(request)
        .await
        .map_err(|err| (StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "update enqueued",
            "run_id": job.run_id,
            "release": job.release,
        })),
    ))
}

pub async fn update_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let current = state.versions.current_release().await.map_err(internal)?;
    let body = match current {
        None => json!({ "release": null, "status": "unknown" }),
        Some(version) => json!({
            "release": version.release,
            "status": version.status,
            "started_at": version.started_at,
            "finished_at": version.finished_at,
            "note": version.note,
        }),
    };
    Ok(Json(body))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    state
        .worker
        .job(run_id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("unknown run id {run_id}")))
}
