mod common;

use std::time::Duration;

use chrono::Utc;
use common::{test_app, test_app_with, test_settings, transaction};
use order_reconciler::domain::{ErrorCategory, OrderStatus, ServiceKind, TransactionStatus};
use order_reconciler::ports::{OrderRepository, TransactionRepository};
use order_reconciler::provider::ProviderError;
use order_reconciler::services::{LockManager, PaymentStatus, ProcessOutcome, Trigger};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_processing_dispatches_once() {
    let app = test_app().await;
    app.provider.set_delay(Duration::from_millis(50));
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/p/abc/"],
        100,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let processor = app.state.processor.clone();
        let id = tx.id;
        handles.push(tokio::spawn(async move {
            processor.process(id, Trigger::Webhook, false).await.unwrap()
        }));
    }

    let mut processed = 0;
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "unexpected outcome {:?}", result.outcome);
        if result.outcome == ProcessOutcome::Processed {
            processed += 1;
        }
    }

    assert_eq!(processed, 1);
    assert_eq!(app.provider.submissions().len(), 1);
    assert_eq!(app.store.list_orders_for_transaction(tx.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_webhooks_for_one_payment() {
    let app = test_app().await;
    app.provider.set_delay(Duration::from_millis(30));
    let tx = transaction(
        ServiceKind::Followers,
        &[],
        500,
        TransactionStatus::Pending,
    );
    let payment_id = tx.payment_id.clone().unwrap();
    app.store.put_transaction(tx.clone()).await;
    app.gateway.set(&payment_id, PaymentStatus::Approved);

    let first = {
        let payments = app.state.payments.clone();
        let payment_id = payment_id.clone();
        tokio::spawn(async move { payments.check_with_trigger(&payment_id, Trigger::Webhook).await })
    };
    let second = {
        let payments = app.state.payments.clone();
        let payment_id = payment_id.clone();
        tokio::spawn(async move { payments.check_with_trigger(&payment_id, Trigger::Webhook).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let submissions = app.provider.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].link, "someone");
    assert_eq!(submissions[0].quantity, 500);

    let stored = app.store.get_transaction(tx.id).await.unwrap().unwrap();
    assert!(stored.is_processed);
    assert!(stored.order_created);
}

#[tokio::test]
async fn test_quantity_is_conserved_across_targets() {
    let app = test_app().await;
    let tx = transaction(
        ServiceKind::Likes,
        &[
            "https://instagram.com/p/one/",
            "https://www.instagram.com/p/two/?igshid=x",
            "instagram.com/reel/three",
        ],
        100,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let result = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(result.outcome, ProcessOutcome::Processed);

    let mut quantities: Vec<i32> = app
        .store
        .list_orders_for_transaction(tx.id)
        .await
        .unwrap()
        .iter()
        .map(|o| o.quantity)
        .collect();
    quantities.sort();
    assert_eq!(quantities, vec![33, 33, 34]);
}

#[tokio::test]
async fn test_duplicate_links_keep_the_full_quantity() {
    let app = test_app().await;
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/p/abc/", "https://www.instagram.com/p/abc"],
        1000,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let result = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(result.outcome, ProcessOutcome::Processed);
    assert!(result.error.is_none());
    assert_eq!(result.report.unwrap().delivered(), 1);

    let submitted: i32 = app.provider.submissions().iter().map(|r| r.quantity).sum();
    assert_eq!(submitted, 1000);
    let orders = app.store.list_orders_for_transaction(tx.id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, 1000);
}

#[tokio::test]
async fn test_below_minimum_resubmits_at_minimum() {
    let app = test_app().await;
    app.provider.push_error(ProviderError::BelowMinimum {
        minimum: 100,
        message: "Quantity less than minimal 100".to_string(),
    });
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/p/small/"],
        50,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let result = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(result.outcome, ProcessOutcome::Processed);

    let sent: Vec<i32> = app.provider.submissions().iter().map(|r| r.quantity).collect();
    assert_eq!(sent, vec![50, 100]);

    let orders = app.store.list_orders_for_transaction(tx.id).await.unwrap();
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.quantity, 50);
    assert!(order.is_dispatched());
    assert!(order.metadata.quantity_adjusted);
    assert_eq!(order.metadata.submitted_quantity, Some(100));
    assert_eq!(order.metadata.provider_minimum, Some(100));
}

#[tokio::test]
async fn test_provider_timeout_is_retried_without_duplicates() {
    let app = test_app_with(test_settings(), Duration::from_millis(50)).await;
    app.provider.set_delay(Duration::from_millis(300));
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/p/slow/"],
        200,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let first = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(first.outcome, ProcessOutcome::Failed);
    assert!(first.needs_retry);

    let orders = app.store.list_orders_for_transaction(tx.id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Error);
    assert_eq!(orders[0].error_category(), Some(ErrorCategory::NetworkError));
    let stored = app.store.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Approved);

    app.provider.set_delay(Duration::ZERO);
    let second = app
        .state
        .processor
        .process(tx.id, Trigger::Retry, false)
        .await
        .unwrap();
    assert_eq!(second.outcome, ProcessOutcome::Processed);

    let after = app.store.list_orders_for_transaction(tx.id).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, orders[0].id);
    assert!(after[0].is_dispatched());
    assert!(!after[0].needs_admin_attention);
}

#[tokio::test]
async fn test_expired_lock_does_not_block_processing() {
    let app = test_app().await;
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/p/abc/"],
        100,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    // A worker that died ten minutes ago with a five minute lease.
    let dead = LockManager::new(app.store.clone(), chrono::Duration::minutes(5), "dead-worker");
    let grant = dead
        .acquire_at(tx.id, Utc::now() - chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert!(grant.granted);
    assert!(!app.state.processor.locks().is_locked(tx.id).await.unwrap());

    let result = app
        .state
        .processor
        .process(tx.id, Trigger::Retry, false)
        .await
        .unwrap();
    assert_eq!(result.outcome, ProcessOutcome::Processed);
}

#[tokio::test]
async fn test_live_lock_blocks_other_workers() {
    let app = test_app().await;
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/p/abc/"],
        100,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let other = LockManager::new(app.store.clone(), chrono::Duration::minutes(5), "other-worker");
    let grant = other.acquire(tx.id).await.unwrap();

    let blocked = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(blocked.outcome, ProcessOutcome::SkippedLocked);
    assert!(app.provider.submissions().is_empty());

    other.release(tx.id, &grant.lock_token.unwrap()).await.unwrap();
    let processed = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(processed.outcome, ProcessOutcome::Processed);
}

#[tokio::test]
async fn test_profile_link_for_likes_needs_admin() {
    let app = test_app().await;
    let tx = transaction(
        ServiceKind::Likes,
        &["https://instagram.com/someone/"],
        100,
        TransactionStatus::Approved,
    );
    app.store.put_transaction(tx.clone()).await;

    let result = app
        .state
        .processor
        .process(tx.id, Trigger::Webhook, false)
        .await
        .unwrap();
    assert_eq!(result.outcome, ProcessOutcome::Failed);
    assert!(app.provider.submissions().is_empty());

    let orders = app.store.list_orders_for_transaction(tx.id).await.unwrap();
    assert_eq!(orders[0].error_category(), Some(ErrorCategory::InvalidLink));
    assert!(orders[0]
        .metadata
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("profile"));
    assert!(orders[0].needs_admin_attention);

    let stored = app.store.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Error);
    assert!(stored.needs_admin_attention);

    // Fixed by an admin: resolve the order, then force a reprocess.
    app.state
        .admin
        .mark_order_resolved(orders[0].id, "ops", Some("customer sent a post link".to_string()))
        .await
        .unwrap();
    let retried = app
        .state
        .admin
        .force_reprocess(tx.id, "ops", None)
        .await
        .unwrap();
    // The link itself is still a profile link, so it is rejected again.
    assert_eq!(retried.outcome, ProcessOutcome::Failed);
    assert!(app.provider.submissions().is_empty());
}
