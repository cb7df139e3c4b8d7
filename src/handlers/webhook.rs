use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::services::payment::PaymentError;
use crate::services::Trigger;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationData {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
}

/// Payment notification. Only the payment id is trusted; the status is always
/// read back from the payment gateway.
#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    #[serde(default, rename = "type", alias = "topic")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<NotificationData>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub payment_id: Option<String>,
}

impl PaymentNotification {
    pub fn payment_id(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.id.as_deref())
            .or(self.payment_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub async fn payment_notification(
    State(state): State<AppState>,
    Json(payload): Json<PaymentNotification>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(kind) = payload.kind.as_deref() {
        if kind != "payment" {
            tracing::debug!(kind, "Ignoring non-payment notification");
            return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
        }
    }
    let payment_id = payload
        .payment_id()
        .ok_or_else(|| AppError::BadRequest("notification without payment id".to_string()))?;

    match state
        .payments
        .check_with_trigger(payment_id, Trigger::Webhook)
        .await
    {
        Ok(check) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "processed", "result": check })),
        )),
        Err(PaymentError::UnknownPayment(_)) => {
            // Acknowledge so the gateway stops redelivering.
            tracing::warn!(payment_id, "Notification for unknown payment");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))))
        }
        Err(e) => Err(e.into()),
    }
}
