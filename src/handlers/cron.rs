use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::error::AppError;
use crate::AppState;

/// Entry point for an external cron; same work as one scheduled tick.
pub async fn reconcile(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.reconciler.tick(Utc::now()).await)
}

pub async fn clear_locks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let removed = state.processor.locks().clear_expired().await?;
    Ok(Json(json!({ "removed": removed })))
}
