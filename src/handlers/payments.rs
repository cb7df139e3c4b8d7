use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::domain::AttemptResult;
use crate::error::AppError;
use crate::services::IntentRequest;
use crate::AppState;

/// 201 for a new transaction, 200 when the request collapsed onto an existing one.
pub async fn create_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.payments.create_intent(&request).await?;
    let status = match outcome.result {
        AttemptResult::New => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let check = state.payments.check_payment_status(&payment_id).await?;
    Ok(Json(check))
}
