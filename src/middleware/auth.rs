use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

/// Guards admin and cron routes. Accepts `Authorization: Bearer <key>` or the
/// bare key. Without a configured key every request is refused.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        tracing::warn!(path = %req.uri().path(), "Admin request refused: ADMIN_API_KEY is not set");
        return Err(AppError::Unauthorized("admin access is disabled".to_string()));
    };

    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim());

    match provided {
        Some(key) if key == expected => Ok(next.run(req).await),
        _ => {
            tracing::warn!(path = %req.uri().path(), "Admin request with missing or wrong key");
            Err(AppError::Unauthorized("invalid admin key".to_string()))
        }
    }
}
