use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

const ACTOR_HEADER: &str = "x-admin-actor";

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or("admin")
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct ForceUnlockRequest {
    /// Must repeat the transaction id.
    pub confirm: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReprocessRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.jobs.snapshot().await)
}

pub async fn list_locks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.admin.lock_status().await?))
}

pub async fn force_unlock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ForceUnlockRequest>,
) -> Result<impl IntoResponse, AppError> {
    let removed = state
        .admin
        .force_unlock(id, &actor(&headers), &body.confirm)
        .await?;
    Ok(Json(json!({ "transaction_id": id, "removed": removed })))
}

pub async fn reprocess_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<ReprocessRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.unwrap_or_default();
    let result = state
        .admin
        .force_reprocess(id, &actor(&headers), body.reason.as_deref())
        .await?;
    Ok(Json(result))
}

pub async fn resolve_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<ResolveRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.unwrap_or_default();
    let order = state
        .admin
        .mark_order_resolved(id, &actor(&headers), body.note)
        .await?;
    Ok(Json(order))
}
