//! HTTP trigger surface: on-demand task runs and alert views.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Alert;
use crate::runner::{BatchResult, BatchRunner, TaskKind};

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<BatchRunner>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerParams {
    /// Bypass the observation cache for this run.
    #[serde(default)]
    pub force: bool,
}

fn parse_task(raw: &str) -> Result<TaskKind, ApiError> {
    TaskKind::from_str(raw).map_err(ApiError::BadRequest)
}

/// POST /fields/{id}/tasks/{task}
pub async fn trigger_field_task(
    State(state): State<AppState>,
    Path((field_id, task)): Path<(Uuid, String)>,
    Query(params): Query<TriggerParams>,
) -> Result<Json<BatchResult>, ApiError> {
    let task = parse_task(&task)?;
    let field = state
        .runner
        .pipeline()
        .storage()
        .field(field_id)
        .await
        .map_err(ApiError::from)?;
    let result = state.runner.run_batch(vec![field], task, params.force).await;
    Ok(Json(result))
}

/// POST /tasks/{task}/bulk
pub async fn trigger_bulk_task(
    State(state): State<AppState>,
    Path(task): Path<String>,
    Query(params): Query<TriggerParams>,
) -> Result<Json<BatchResult>, ApiError> {
    let task = parse_task(&task)?;
    let fields = state
        .runner
        .pipeline()
        .storage()
        .active_fields()
        .await
        .map_err(ApiError::from)?;
    let result = state.runner.run_batch(fields, task, params.force).await;
    Ok(Json(result))
}

/// GET /fields/{id}/alerts
pub async fn list_field_alerts(
    State(state): State<AppState>,
    Path(field_id): Path<Uuid>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let storage = state.runner.pipeline().storage();
    // 404 for unknown fields rather than an empty list.
    storage.field(field_id).await.map_err(ApiError::from)?;
    let alerts = storage
        .alerts_for_field(field_id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(alerts))
}

/// POST /alerts/{id}/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state
        .runner
        .pipeline()
        .alerts()
        .resolve_by_id(alert_id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(alert))
}

/// GET /healthz
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
