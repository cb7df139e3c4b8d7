mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use chrono::Utc;
use common::{body_json, test_app, transaction, ADMIN_KEY};
use order_reconciler::create_app;
use order_reconciler::domain::{ServiceKind, TransactionStatus};
use order_reconciler::ports::{OrderRepository, TransactionRepository};
use order_reconciler::services::{JobScheduler, LockManager, PaymentStatus, ReconcileJob};
use serde_json::{json, Value};
use tower::ServiceExt;

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY))
        .header("x-admin-actor", "ops@example.com");
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn intent_body(payment_id: &str) -> Value {
    json!({
        "service": {
            "service_id": "ig-followers-500",
            "kind": "followers",
            "provider_id": "main",
            "external_service_id": "101",
            "quantity": 500
        },
        "customer": { "email": "buyer@example.com" },
        "target_username": "@someone",
        "amount": "19.90",
        "payment_provider": "card",
        "payment_id": payment_id
    })
}

#[tokio::test]
async fn test_health_reports_dependencies() {
    let app = test_app().await;
    let response = create_app(app.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["store"]["status"], "healthy");
    assert_eq!(body["dependencies"]["providers"]["status"], "healthy");
}

#[tokio::test]
async fn test_admin_routes_require_key() {
    let app = test_app().await;
    let router = create_app(app.state.clone());

    let anonymous = router
        .clone()
        .oneshot(Request::builder().uri("/admin/locks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/locks")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let bare = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/locks")
                .header(header::AUTHORIZATION, ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bare.status(), StatusCode::OK);

    let ok = router
        .oneshot(admin_request(Method::GET, "/admin/locks", None))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body = body_json(ok).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_admin_lists_scheduled_jobs() {
    let app = test_app().await;
    let mut scheduler = JobScheduler::with_board(app.state.jobs.clone());
    scheduler
        .add_job(
            Arc::new(ReconcileJob::new(app.state.reconciler.clone())),
            "0 */5 * * * *",
        )
        .await
        .unwrap();

    let response = create_app(app.state.clone())
        .oneshot(admin_request(Method::GET, "/admin/jobs", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["reconcile"]["schedule"], "0 */5 * * * *");
    assert_eq!(body["reconcile"]["runs"], 0);
    assert!(body["reconcile"]["next_run"].is_string());
}

#[tokio::test]
async fn test_admin_routes_disabled_without_key() {
    let app = test_app().await;
    let mut state = app.state.clone();
    state.admin_api_key = None;

    let response = create_app(state)
        .oneshot(admin_request(Method::POST, "/cron/reconcile", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_intent_returns_same_transaction() {
    let app = test_app().await;
    let router = create_app(app.state.clone());

    let first = router
        .clone()
        .oneshot(json_request(Method::POST, "/payments/intents", intent_body("pay-dup")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = body_json(first).await;
    assert_eq!(first["result"], "new");

    let second = router
        .oneshot(json_request(Method::POST, "/payments/intents", intent_body("pay-dup")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_json(second).await;
    assert_eq!(second["result"], "existing");
    assert_eq!(first["transaction"]["id"], second["transaction"]["id"]);
    assert_eq!(first["idempotency_key"], second["idempotency_key"]);
}

#[tokio::test]
async fn test_invalid_intent_is_rejected() {
    let app = test_app().await;
    let mut body = intent_body("pay-bad");
    body["amount"] = json!("0");

    let response = create_app(app.state.clone())
        .oneshot(json_request(Method::POST, "/payments/intents", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_for_unknown_payment_is_acknowledged() {
    let app = test_app().await;
    let response = create_app(app.state.clone())
        .oneshot(json_request(
            Method::POST,
            "/webhooks/payment",
            json!({ "type": "payment", "data": { "id": 987654 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ignored");
    assert_eq!(app.gateway.calls(), 0);
}

#[tokio::test]
async fn test_webhook_without_payment_id_is_bad_request() {
    let app = test_app().await;
    let response = create_app(app.state.clone())
        .oneshot(json_request(
            Method::POST,
            "/webhooks/payment",
            json!({ "type": "payment", "data": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_intent_then_webhook_creates_order() {
    let app = test_app().await;
    let router = create_app(app.state.clone());

    let created = router
        .clone()
        .oneshot(json_request(Method::POST, "/payments/intents", intent_body("pay-flow")))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    let tx_id: uuid::Uuid = serde_json::from_value(created["transaction"]["id"].clone()).unwrap();

    // The notification claims nothing; the gateway is the source of truth.
    app.gateway.set("pay-flow", PaymentStatus::Approved);
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/webhooks/payment",
                json!({ "type": "payment", "data": { "id": "pay-flow" } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "processed");
    }

    let submissions = app.provider.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].link, "someone");
    assert_eq!(submissions[0].quantity, 500);

    let tx = app.store.get_transaction(tx_id).await.unwrap().unwrap();
    assert!(tx.is_processed);
    assert_eq!(app.store.list_orders_for_transaction(tx_id).await.unwrap().len(), 1);

    let status = router
        .oneshot(
            Request::builder()
                .uri("/payments/pay-flow/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let status = body_json(status).await;
    assert_eq!(status["transaction_status"], "processing");
}

#[tokio::test]
async fn test_rejected_payment_cancels_transaction() {
    let app = test_app().await;
    let tx = transaction(ServiceKind::Followers, &[], 100, TransactionStatus::Pending);
    let payment_id = tx.payment_id.clone().unwrap();
    app.store.put_transaction(tx.clone()).await;
    app.gateway.set(&payment_id, PaymentStatus::Rejected);

    let response = create_app(app.state.clone())
        .oneshot(json_request(
            Method::POST,
            "/webhooks/payment",
            json!({ "topic": "payment", "payment_id": payment_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.store.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Cancelled);
    assert!(app.provider.submissions().is_empty());
}

#[tokio::test]
async fn test_force_unlock_requires_confirmation() {
    let app = test_app().await;
    let tx = transaction(ServiceKind::Followers, &[], 100, TransactionStatus::Approved);
    app.store.put_transaction(tx.clone()).await;
    let other = LockManager::new(app.store.clone(), chrono::Duration::minutes(5), "other-worker");
    other.acquire(tx.id).await.unwrap();

    let router = create_app(app.state.clone());
    let uri = format!("/admin/locks/{}/force-unlock", tx.id);

    let wrong = router
        .clone()
        .oneshot(admin_request(
            Method::POST,
            &uri,
            Some(json!({ "confirm": "not-the-id" })),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
    assert!(app.state.processor.locks().is_locked(tx.id).await.unwrap());

    let right = router
        .oneshot(admin_request(
            Method::POST,
            &uri,
            Some(json!({ "confirm": tx.id.to_string() })),
        ))
        .await
        .unwrap();
    assert_eq!(right.status(), StatusCode::OK);
    let body = body_json(right).await;
    assert_eq!(body["removed"], true);
    assert!(!app.state.processor.locks().is_locked(tx.id).await.unwrap());

    let audit = app.store.audit_entries().await;
    assert!(audit
        .iter()
        .any(|e| e.action == "force_unlock" && e.actor == "ops@example.com"));
}

#[tokio::test]
async fn test_admin_reprocess_and_resolve() {
    let app = test_app().await;
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/someone/"],
        100,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;
    app.state
        .processor
        .process(tx.id, order_reconciler::services::Trigger::Webhook, false)
        .await
        .unwrap();
    let order = app.store.list_orders_for_transaction(tx.id).await.unwrap().remove(0);
    assert!(order.needs_admin_attention);

    let router = create_app(app.state.clone());
    let resolved = router
        .clone()
        .oneshot(admin_request(
            Method::POST,
            &format!("/admin/orders/{}/resolve", order.id),
            Some(json!({ "note": "refunded by hand" })),
        ))
        .await
        .unwrap();
    assert_eq!(resolved.status(), StatusCode::OK);
    let body = body_json(resolved).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["needs_admin_attention"], false);
    assert_eq!(body["metadata"]["manual_resolution"]["resolved_by"], "ops@example.com");

    let again = router
        .clone()
        .oneshot(admin_request(
            Method::POST,
            &format!("/admin/orders/{}/resolve", order.id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let missing = router
        .oneshot(admin_request(
            Method::POST,
            &format!("/admin/transactions/{}/reprocess", uuid::Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cron_reconcile_runs_a_tick() {
    let app = test_app().await;
    let mut tx = transaction(ServiceKind::Followers, &[], 100, TransactionStatus::Pending);
    tx.created_at = Utc::now() - chrono::Duration::hours(2);
    app.store.put_transaction(tx.clone()).await;

    let response = create_app(app.state.clone())
        .oneshot(admin_request(Method::POST, "/cron/reconcile", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["expired"], 1);
    assert_eq!(body["errors"], 0);

    let order_count = app.store.list_orders_for_transaction(tx.id).await.unwrap().len();
    assert_eq!(order_count, 0);
}
