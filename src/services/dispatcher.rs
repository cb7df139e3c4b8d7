//! Turns a paid transaction into provider orders, one per target.
//!
//! Safe to run again on the same transaction: targets that already carry a
//! provider order id are skipped, so a retry only resubmits what failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::target::{extract_username, is_content_link, is_profile_link, normalize_link};
use crate::domain::{ErrorCategory, Order, OrderStatus, ServiceInfo, TargetItem, Transaction};
use crate::ports::{RepositoryError, Store};
use crate::provider::{ProviderError, ProviderRequest, ProviderRouter};

const DEFAULT_MAX_SUBMIT_ATTEMPTS: i32 = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transaction cannot be turned into orders without human help.
    #[error("transaction cannot be dispatched: {0}")]
    Invalid(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemResult {
    Submitted { external_id: String },
    AlreadyDispatched,
    /// Failed earlier in a way a resubmission would not fix.
    AwaitingAdmin,
    Failed {
        category: ErrorCategory,
        message: String,
    },
    /// Another writer stored an order for this target first.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub target_link: String,
    pub quantity: i32,
    pub order_id: Option<Uuid>,
    #[serde(flatten)]
    pub result: ItemResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub transaction_id: Uuid,
    pub items: Vec<ItemOutcome>,
}

impl DispatchReport {
    /// Targets that have a live provider order after this run.
    pub fn delivered(&self) -> usize {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.result,
                    ItemResult::Submitted { .. } | ItemResult::AlreadyDispatched
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.result, ItemResult::Failed { .. } | ItemResult::AwaitingAdmin))
            .count()
    }

    /// True when nothing that failed would succeed on a plain retry.
    pub fn only_permanent_failures(&self) -> bool {
        self.items.iter().all(|i| match &i.result {
            ItemResult::Failed { category, .. } => !category.is_retryable(),
            ItemResult::AwaitingAdmin => true,
            _ => false,
        })
    }

    pub fn has_retryable_failures(&self) -> bool {
        self.items.iter().any(|i| {
            matches!(&i.result, ItemResult::Failed { category, .. } if category.is_retryable())
        })
    }

    pub fn summary(&self) -> String {
        let failures: Vec<String> = self
            .items
            .iter()
            .filter_map(|i| match &i.result {
                ItemResult::Failed { category, message } => {
                    Some(format!("{} [{}]: {}", i.target_link, category.as_str(), message))
                }
                ItemResult::AwaitingAdmin => Some(format!("{}: awaiting admin", i.target_link)),
                _ => None,
            })
            .collect();
        format!(
            "{} of {} targets delivered; {}",
            self.delivered(),
            self.items.len(),
            if failures.is_empty() {
                "no failures".to_string()
            } else {
                failures.join("; ")
            }
        )
    }
}

/// One target of a transaction after the quantity split.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Key of the order row, normalized.
    pub link: String,
    /// What the provider receives: the normalized link, or a bare username for
    /// profile services.
    pub submit_as: String,
    pub username: Option<String>,
    pub quantity: i32,
}

/// Splits `total` across items. Explicit per-item quantities are honoured when
/// they add up to `total`; otherwise the split is even and the remainder goes to
/// the first items, one unit each.
pub fn split_quantity(total: i32, explicit: &[Option<i32>]) -> Vec<i32> {
    if explicit.is_empty() || total <= 0 {
        return vec![0; explicit.len()];
    }
    let given: Option<Vec<i32>> = explicit
        .iter()
        .map(|q| q.filter(|q| *q >= 0))
        .collect();
    if let Some(given) = given {
        if given.iter().map(|q| *q as i64).sum::<i64>() == total as i64 {
            return given;
        }
    }

    let n = explicit.len() as i32;
    let base = total / n;
    let remainder = total % n;
    (0..n).map(|i| base + i32::from(i < remainder)).collect()
}

/// One piece of content after duplicate items were folded together.
#[derive(Debug, Clone, PartialEq)]
struct MergedItem {
    raw: String,
    link: String,
    code: Option<String>,
    quantity: Option<i32>,
}

/// Folds items pointing at the same content into one: same normalized link, or
/// same post code. Explicit quantities add up; one missing quantity makes the
/// merged one missing too.
fn merge_items(items: &[TargetItem]) -> Vec<MergedItem> {
    let mut merged: Vec<MergedItem> = Vec::with_capacity(items.len());
    for item in items {
        let link = normalize_link(&item.link);
        let code = item
            .code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let existing = merged
            .iter_mut()
            .find(|m| m.link == link || (code.is_some() && m.code == code));
        match existing {
            Some(m) => {
                m.quantity = match (m.quantity, item.quantity) {
                    (Some(a), Some(b)) => a.checked_add(b),
                    _ => None,
                };
                if m.code.is_none() {
                    m.code = code;
                }
            }
            None => merged.push(MergedItem {
                raw: item.link.clone(),
                link,
                code,
                quantity: item.quantity,
            }),
        }
    }
    merged
}

/// Resolves where each unit of the purchase goes.
pub fn build_targets(tx: &Transaction, service: &ServiceInfo) -> Result<Vec<Target>, DispatchError> {
    let profile = service.kind.targets_profile();

    if tx.metadata.items.is_empty() {
        if !profile {
            return Err(DispatchError::Invalid(format!(
                "{:?} service without any post link",
                service.kind
            )));
        }
        let username = extract_username(&tx.target_username).ok_or_else(|| {
            DispatchError::Invalid(format!("unusable target username '{}'", tx.target_username))
        })?;
        return Ok(vec![Target {
            link: username.clone(),
            submit_as: username.clone(),
            username: Some(username),
            quantity: service.quantity,
        }]);
    }

    let items = merge_items(&tx.metadata.items);
    let explicit: Vec<Option<i32>> = items.iter().map(|i| i.quantity).collect();
    let quantities = split_quantity(service.quantity, &explicit);

    Ok(items
        .into_iter()
        .zip(quantities)
        .filter(|(_, quantity)| *quantity > 0)
        .map(|(item, quantity)| {
            let username = extract_username(&item.raw);
            let submit_as = match (&username, profile) {
                (Some(name), true) => name.clone(),
                _ => item.link.clone(),
            };
            Target {
                link: item.link,
                submit_as,
                username,
                quantity,
            }
        })
        .collect())
}

#[derive(Clone)]
pub struct OrderDispatcher {
    store: Arc<dyn Store>,
    router: Arc<ProviderRouter>,
    item_delay: Duration,
    max_submit_attempts: i32,
}

impl OrderDispatcher {
    pub fn new(store: Arc<dyn Store>, router: Arc<ProviderRouter>, item_delay: Duration) -> Self {
        Self {
            store,
            router,
            item_delay,
            max_submit_attempts: DEFAULT_MAX_SUBMIT_ATTEMPTS,
        }
    }

    /// Submissions per order before a retryable failure is left to an admin.
    pub fn with_max_submit_attempts(mut self, attempts: i32) -> Self {
        self.max_submit_attempts = attempts.max(1);
        self
    }

    pub fn max_submit_attempts(&self) -> i32 {
        self.max_submit_attempts
    }

    /// Submits every target without a provider order. `force` also resubmits
    /// orders that used up their submission attempts.
    pub async fn dispatch(&self, tx: &Transaction, force: bool) -> Result<DispatchReport, DispatchError> {
        let service = tx
            .metadata
            .service
            .as_ref()
            .ok_or_else(|| DispatchError::Invalid("transaction has no service".to_string()))?;
        let targets = build_targets(tx, service)?;
        if targets.is_empty() {
            return Err(DispatchError::Invalid("no target with a positive quantity".to_string()));
        }

        let mut items = Vec::with_capacity(targets.len());
        let mut submitted_before = false;
        for target in targets {
            let existing = self.store.find_order_for_target(tx.id, &target.link).await?;
            if let Some(order) = &existing {
                if order.is_dispatched() {
                    items.push(outcome(&target, Some(order.id), ItemResult::AlreadyDispatched));
                    continue;
                }
                if order.awaits_admin() {
                    items.push(outcome(&target, Some(order.id), ItemResult::AwaitingAdmin));
                    continue;
                }
                if !force && order.metadata.submit_attempts >= self.max_submit_attempts {
                    tracing::warn!(
                        order_id = %order.id,
                        attempts = order.metadata.submit_attempts,
                        "Order used up its submissions"
                    );
                    items.push(outcome(&target, Some(order.id), ItemResult::AwaitingAdmin));
                    continue;
                }
            }

            if submitted_before && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
            submitted_before = true;

            let (order_id, result) = self.submit_item(tx, service, &target, existing).await?;
            items.push(outcome(&target, order_id, result));
        }

        let report = DispatchReport {
            transaction_id: tx.id,
            items,
        };
        tracing::info!(
            transaction_id = %tx.id,
            delivered = report.delivered(),
            failed = report.failed(),
            total = report.items.len(),
            "Dispatch finished"
        );
        Ok(report)
    }

    async fn submit_item(
        &self,
        tx: &Transaction,
        service: &ServiceInfo,
        target: &Target,
        existing: Option<Order>,
    ) -> Result<(Option<Uuid>, ItemResult), DispatchError> {
        let is_new = existing.is_none();
        let mut order = existing.unwrap_or_else(|| {
            Order::new(
                tx.id,
                service.provider_id.clone(),
                target.link.clone(),
                target.username.clone(),
                target.quantity,
            )
        });
        order.provider_id = service.provider_id.clone();
        order.quantity = target.quantity;
        order.metadata.service_kind = Some(service.kind);
        order.metadata.submit_attempts += 1;

        if !service.kind.targets_profile() && is_profile_link(&target.link) {
            order.record_error(
                ErrorCategory::InvalidLink,
                format!("{:?} need a post or reel link, got a profile: {}", service.kind, target.link),
            );
        } else if !service.kind.targets_profile() && !is_content_link(&target.link) {
            order.record_error(
                ErrorCategory::InvalidLink,
                format!("{:?} need a post or reel link, got {}", service.kind, target.link),
            );
        } else {
            self.submit_to_provider(&mut order, service, target).await;
        }
        order.updated_at = Utc::now();

        let stored = if is_new {
            match self.store.insert_order(&order).await {
                Ok(_) => true,
                Err(RepositoryError::Conflict(_)) => false,
                Err(e) => return Err(e.into()),
            }
        } else {
            self.store.update_undispatched_order(&order).await?
        };
        if !stored {
            // The provider may now hold an order we could not record.
            tracing::error!(
                transaction_id = %tx.id,
                target = %target.link,
                external_order_id = ?order.external_order_id,
                "Concurrent writer stored this target first"
            );
            return Ok((None, ItemResult::Conflict));
        }

        let result = match (&order.external_order_id, &order.metadata.error) {
            (Some(external_id), _) => ItemResult::Submitted {
                external_id: external_id.clone(),
            },
            (None, Some(error)) => ItemResult::Failed {
                category: error.category,
                message: error.message.clone(),
            },
            (None, None) => ItemResult::Failed {
                category: ErrorCategory::ProviderRejected,
                message: "no provider order id".to_string(),
            },
        };
        Ok((Some(order.id), result))
    }

    async fn submit_to_provider(&self, order: &mut Order, service: &ServiceInfo, target: &Target) {
        let mut request = ProviderRequest {
            service: service.external_service_id.clone(),
            link: target.submit_as.clone(),
            quantity: target.quantity,
        };
        order.metadata.request = serde_json::to_value(&request).ok();

        let mut result = self.router.send(&service.provider_id, &request).await;

        if let Err(ProviderError::BelowMinimum { minimum, .. }) = &result {
            let minimum = *minimum;
            if minimum > i64::from(request.quantity) && minimum <= i64::from(i32::MAX) {
                tracing::info!(
                    order_id = %order.id,
                    paid = request.quantity,
                    minimum,
                    "Resubmitting at provider minimum"
                );
                request.quantity = minimum as i32;
                order.metadata.quantity_adjusted = true;
                order.metadata.submitted_quantity = Some(request.quantity);
                order.metadata.provider_minimum = Some(minimum);
                order.metadata.request = serde_json::to_value(&request).ok();
                result = self.router.send(&service.provider_id, &request).await;
            }
        }

        match result {
            Ok(response) => {
                order.external_order_id = Some(response.external_id);
                order.status = OrderStatus::Pending;
                order.needs_admin_attention = false;
                order.metadata.error = None;
                order.metadata.response = Some(response.raw);
            }
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    provider_id = %service.provider_id,
                    category = e.category().as_str(),
                    error = %e,
                    "Provider submission failed"
                );
                order.record_error(e.category(), e.to_string());
            }
        }
    }
}

fn outcome(target: &Target, order_id: Option<Uuid>, result: ItemResult) -> ItemOutcome {
    ItemOutcome {
        target_link: target.link.clone(),
        quantity: target.quantity,
        order_id,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ServiceKind, TransactionMetadata};
    use bigdecimal::BigDecimal;

    #[test]
    fn test_split_even_with_remainder_first() {
        assert_eq!(split_quantity(100, &[None, None, None]), vec![34, 33, 33]);
        assert_eq!(split_quantity(2, &[None, None, None]), vec![1, 1, 0]);
        assert_eq!(split_quantity(9, &[None, None, None]), vec![3, 3, 3]);
    }

    #[test]
    fn test_split_uses_explicit_quantities_only_when_they_add_up() {
        assert_eq!(split_quantity(100, &[Some(70), Some(30)]), vec![70, 30]);
        assert_eq!(split_quantity(100, &[Some(70), Some(20)]), vec![50, 50]);
        assert_eq!(split_quantity(100, &[Some(100), None]), vec![50, 50]);
    }

    #[test]
    fn test_split_conserves_total() {
        for total in [1, 7, 99, 1000, 1001] {
            for n in 1..6 {
                let split = split_quantity(total, &vec![None; n]);
                assert_eq!(split.iter().sum::<i32>(), total, "total {} over {}", total, n);
            }
        }
    }

    fn tx(kind: ServiceKind, links: &[&str], quantity: i32) -> Transaction {
        let metadata = TransactionMetadata {
            service: Some(ServiceInfo {
                service_id: "svc".to_string(),
                name: None,
                kind,
                provider_id: "main".to_string(),
                external_service_id: "1".to_string(),
                quantity,
            }),
            items: links
                .iter()
                .map(|l| TargetItem {
                    link: l.to_string(),
                    code: None,
                    quantity: None,
                })
                .collect(),
            ..Default::default()
        };
        Transaction::new(BigDecimal::from(5), "@someone".to_string(), None, metadata, None)
    }

    #[test]
    fn test_followers_without_items_target_the_username() {
        let t = tx(ServiceKind::Followers, &[], 1000);
        let targets = build_targets(&t, t.metadata.service.as_ref().unwrap()).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].submit_as, "someone");
        assert_eq!(targets[0].quantity, 1000);
    }

    #[test]
    fn test_post_services_require_items() {
        let t = tx(ServiceKind::Likes, &[], 100);
        assert!(matches!(
            build_targets(&t, t.metadata.service.as_ref().unwrap()),
            Err(DispatchError::Invalid(_))
        ));
    }

    #[test]
    fn test_targets_are_normalized_and_zero_items_dropped() {
        let t = tx(
            ServiceKind::Likes,
            &[
                "https://www.instagram.com/p/a/?igshid=1",
                "instagram.com/p/b",
                "https://instagram.com/p/c/",
            ],
            2,
        );
        let targets = build_targets(&t, t.metadata.service.as_ref().unwrap()).unwrap();
        let links: Vec<&str> = targets.iter().map(|t| t.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://instagram.com/p/a/", "https://instagram.com/p/b/"]
        );
        assert_eq!(targets[0].submit_as, targets[0].link);
    }

    #[test]
    fn test_links_that_normalize_alike_share_one_target() {
        let t = tx(
            ServiceKind::Likes,
            &["https://instagram.com/p/abc/", "https://www.instagram.com/p/abc"],
            1000,
        );
        let targets = build_targets(&t, t.metadata.service.as_ref().unwrap()).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].link, "https://instagram.com/p/abc/");
        assert_eq!(targets[0].quantity, 1000);
    }

    #[test]
    fn test_merged_items_sum_explicit_quantities() {
        let mut t = tx(ServiceKind::Likes, &[], 1000);
        t.metadata.items = vec![
            TargetItem {
                link: "https://instagram.com/p/abc/".to_string(),
                code: Some("abc".to_string()),
                quantity: Some(300),
            },
            TargetItem {
                link: "https://instagram.com/p/def/".to_string(),
                code: None,
                quantity: Some(400),
            },
            TargetItem {
                link: "instagram.com/p/abc?utm_source=x".to_string(),
                code: Some("abc".to_string()),
                quantity: Some(300),
            },
        ];
        let targets = build_targets(&t, t.metadata.service.as_ref().unwrap()).unwrap();
        let split: Vec<(&str, i32)> = targets
            .iter()
            .map(|t| (t.link.as_str(), t.quantity))
            .collect();
        assert_eq!(
            split,
            vec![
                ("https://instagram.com/p/abc/", 600),
                ("https://instagram.com/p/def/", 400)
            ]
        );
    }
}
