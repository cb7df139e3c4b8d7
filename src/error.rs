use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::services::admin::AdminError;
use crate::services::idempotency::IdempotencyError;
use crate::services::lock_manager::LockError;
use crate::services::payment::{PaymentError, PaymentGatewayError};
use crate::services::transaction_processor::ProcessError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(#[from] PaymentGatewayError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Repository(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentGateway(PaymentGatewayError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<LockError> for AppError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::ConfirmationMismatch(_) => AppError::BadRequest(e.to_string()),
            LockError::Repository(e) => e.into(),
        }
    }
}

impl From<ProcessError> for AppError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Repository(e) => e.into(),
            ProcessError::Lock(e) => e.into(),
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(e: IdempotencyError) -> Self {
        match e {
            IdempotencyError::Invalid(msg) => AppError::Validation(msg),
            IdempotencyError::Repository(e) => e.into(),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::UnknownPayment(id) => AppError::NotFound(format!("payment {}", id)),
            PaymentError::Gateway(e) => e.into(),
            PaymentError::Process(e) => e.into(),
            PaymentError::Intent(e) => e.into(),
            PaymentError::Repository(e) => e.into(),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::NotFound(what) => AppError::NotFound(what),
            AdminError::Conflict(msg) => AppError::Conflict(msg),
            AdminError::Lock(e) => e.into(),
            AdminError::Process(e) => e.into(),
            AdminError::Repository(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_repository_error_status_codes() {
        let error = AppError::Repository(RepositoryError::Database("connection refused".to_string()));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let error = AppError::Repository(RepositoryError::Conflict("duplicate key".to_string()));
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_gateway_error_status_code() {
        let error = AppError::PaymentGateway(PaymentGatewayError::InvalidResponse("HTTP 500".to_string()));
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_lock_confirmation_mismatch_is_bad_request() {
        let error: AppError = LockError::ConfirmationMismatch(Uuid::new_v4()).into();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_payment_is_not_found() {
        let error: AppError = PaymentError::UnknownPayment("pay-1".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unauthorized_error_status_code() {
        let error = AppError::Unauthorized("Unauthorized access".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let error = AppError::Validation("Invalid email format".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_conflict_error_response() {
        let error = AppError::Conflict("order changed".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
