//! Reconciliation engine: converges an order's stored payment state with the
//! gateway's authoritative state.
//!
//! Three entry points invoke the same primitive — the asynchronous webhook,
//! the client confirm call, and (read-only) the status poll. They may run
//! concurrently for the same order; the store's compare-and-set guarantees
//! that exactly one invocation observes the transition to paid and fires the
//! notification.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{normalize_provider_status, Order, PaymentStatus};
use crate::gateway::{json_id, GatewayError, PaymentGateway, SearchBy};
use crate::notify::Notifier;
use crate::store::{OrderStore, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order not found")]
    OrderNotFound,
    #[error("could not determine the payment at the gateway")]
    PaymentNotFound,
    #[error("could not determine the order for this payment")]
    UnresolvedOrder,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub struct ReconcileOutcome {
    pub order: Order,
    /// True only for the single invocation that performed the transition to
    /// paid; that invocation has already triggered the notification.
    pub transitioned: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_id: Option<String>,
    pub order_id: Option<Uuid>,
    #[serde(alias = "preferenceId")]
    pub intent_id: Option<String>,
}

impl ConfirmPaymentRequest {
    pub fn is_empty(&self) -> bool {
        self.payment_id.is_none() && self.order_id.is_none() && self.intent_id.is_none()
    }
}

/// What a webhook delivery turned out to be, extracted from the provider's
/// inconsistent shapes (body `data.id`, query `data.id`, bare body `id`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    Payment { payment_id: String },
    NotPayment { topic: Option<String> },
    MissingPaymentId,
}

pub fn classify_webhook(
    body: &serde_json::Value,
    query: &HashMap<String, String>,
) -> WebhookEvent {
    let payment_id = body
        .pointer("/data/id")
        .and_then(json_id)
        .or_else(|| query.get("data.id").filter(|s| !s.is_empty()).cloned())
        .or_else(|| body.get("id").and_then(json_id));

    let topic = query
        .get("type")
        .cloned()
        .or_else(|| body.get("type").and_then(|v| v.as_str()).map(str::to_string))
        .or_else(|| query.get("topic").cloned())
        .or_else(|| body.get("topic").and_then(|v| v.as_str()).map(str::to_string));
    let action = body
        .get("action")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| query.get("action").cloned())
        .unwrap_or_default();

    let is_payment = topic.as_deref().is_some_and(|t| t.contains("payment"))
        || action.contains("payment")
        || payment_id.is_some();
    if !is_payment {
        return WebhookEvent::NotPayment { topic };
    }
    match payment_id {
        Some(payment_id) => WebhookEvent::Payment { payment_id },
        None => WebhookEvent::MissingPaymentId,
    }
}

/// Body of the always-200 webhook response.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookAck {
    fn received() -> Self {
        Self {
            received: true,
            order_id: None,
            status: None,
            error: None,
        }
    }

    fn unrecognized() -> Self {
        Self {
            received: false,
            order_id: None,
            status: None,
            error: None,
        }
    }

    fn failed(error: &str) -> Self {
        Self {
            received: true,
            order_id: None,
            status: None,
            error: Some(error.to_string()),
        }
    }
}

pub struct ReconcileService {
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl ReconcileService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            gateway,
            notifier,
        }
    }

    /// Core primitive: normalize the provider status and apply it with a
    /// compare-and-set. Safe to call any number of times, from any entry
    /// point, concurrently.
    pub async fn reconcile(
        &self,
        order_id: Uuid,
        provider_status: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mapping = normalize_provider_status(provider_status);
        match self
            .orders
            .transition_payment(order_id, mapping.payment, mapping.status)
            .await?
        {
            Some(applied) => {
                let transitioned = applied.previous != PaymentStatus::Paid
                    && applied.order.payment_status == PaymentStatus::Paid;
                tracing::info!(
                    %order_id,
                    from = %applied.previous,
                    to = %applied.order.payment_status,
                    "payment status updated"
                );
                if transitioned {
                    // The paid state is already durable; a notification
                    // failure must not fail the reconciliation.
                    if let Err(err) = self.notifier.order_paid(&applied.order).await {
                        tracing::error!(%order_id, %err, "paid notification failed");
                    }
                }
                Ok(ReconcileOutcome {
                    order: applied.order,
                    transitioned,
                })
            }
            None => {
                let order = self
                    .orders
                    .get(order_id)
                    .await?
                    .ok_or(ReconcileError::OrderNotFound)?;
                Ok(ReconcileOutcome {
                    order,
                    transitioned: false,
                })
            }
        }
    }

    /// Webhook ingestion. Never fails: the gateway retries on anything but a
    /// 200, so every internal failure is logged and acknowledged.
    pub async fn handle_webhook(
        &self,
        body: &serde_json::Value,
        query: &HashMap<String, String>,
    ) -> WebhookAck {
        let payment_id = match classify_webhook(body, query) {
            WebhookEvent::NotPayment { topic } => {
                tracing::info!(?topic, "webhook is not a payment notification");
                return WebhookAck::received();
            }
            WebhookEvent::MissingPaymentId => {
                tracing::warn!("payment webhook without an extractable payment id");
                return WebhookAck::unrecognized();
            }
            WebhookEvent::Payment { payment_id } => payment_id,
        };

        let payment = match self.gateway.get_payment(&payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                tracing::warn!(payment_id, "payment not found at the gateway");
                return WebhookAck::received();
            }
            Err(err) => {
                tracing::error!(payment_id, %err, "could not fetch payment for webhook");
                return WebhookAck::failed("could not fetch payment");
            }
        };

        let Some(order_id) = payment
            .external_reference
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
        else {
            tracing::warn!(payment_id, "payment carries no usable external reference");
            return WebhookAck::received();
        };

        match self.reconcile(order_id, &payment.status).await {
            Ok(outcome) => WebhookAck {
                received: true,
                order_id: Some(order_id),
                status: Some(outcome.order.payment_status),
                error: None,
            },
            Err(ReconcileError::OrderNotFound) => {
                tracing::warn!(%order_id, "webhook for unknown order");
                WebhookAck::received()
            }
            Err(err) => {
                tracing::error!(%order_id, %err, "webhook reconciliation failed");
                WebhookAck::failed("could not update order")
            }
        }
    }

    /// Client-initiated confirmation after returning from the gateway
    /// redirect. May race the webhook; the shared primitive keeps it
    /// idempotent.
    pub async fn confirm(
        &self,
        request: ConfirmPaymentRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut gateway_failure: Option<GatewayError> = None;
        let mut payment = None;

        if let Some(payment_id) = &request.payment_id {
            match self.gateway.get_payment(payment_id).await {
                Ok(found) => payment = found,
                Err(err) => {
                    tracing::warn!(payment_id, %err, "payment lookup failed, trying search");
                    gateway_failure = Some(err);
                }
            }
        }
        if payment.is_none() {
            if let Some(intent_id) = &request.intent_id {
                match self
                    .gateway
                    .search_payment(SearchBy::IntentId(intent_id.clone()))
                    .await
                {
                    Ok(found) => payment = found,
                    Err(err) => {
                        tracing::warn!(intent_id, %err, "payment search by intent failed");
                        gateway_failure = Some(err);
                    }
                }
            }
        }

        let order_id = payment
            .as_ref()
            .and_then(|p| p.external_reference.as_deref())
            .and_then(|r| Uuid::parse_str(r).ok())
            .or(request.order_id);

        if payment.is_none() {
            if let Some(order_id) = order_id {
                match self
                    .gateway
                    .search_payment(SearchBy::ExternalReference(order_id.to_string()))
                    .await
                {
                    Ok(found) => payment = found,
                    Err(err) => {
                        tracing::warn!(%order_id, %err, "payment search by reference failed");
                        gateway_failure = Some(err);
                    }
                }
            }
        }

        let Some(order_id) = order_id else {
            return Err(match (payment, gateway_failure) {
                (None, Some(err)) => ReconcileError::Gateway(err),
                (None, None) => ReconcileError::PaymentNotFound,
                (Some(_), _) => ReconcileError::UnresolvedOrder,
            });
        };

        match payment {
            Some(payment) => self.reconcile(order_id, &payment.status).await,
            None => {
                // Nothing at the gateway yet (or it is unreachable): report
                // the stored state without transitioning anything.
                if let Some(err) = gateway_failure {
                    return Err(ReconcileError::Gateway(err));
                }
                let order = self
                    .orders
                    .get(order_id)
                    .await?
                    .ok_or(ReconcileError::OrderNotFound)?;
                Ok(ReconcileOutcome {
                    order,
                    transitioned: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::domain::OrderStatus;
    use crate::store::memory::MemStore;
    use crate::store::InventoryStore;
    use crate::testutil::{self, CountingNotifier, FakeGateway};

    struct Fixture {
        store: Arc<MemStore>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<CountingNotifier>,
        service: ReconcileService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(CountingNotifier::default());
        let service = ReconcileService::new(store.clone(), gateway.clone(), notifier.clone());
        Fixture {
            store,
            gateway,
            notifier,
            service,
        }
    }

    async fn seeded_order(store: &MemStore, stock: i32, price: i64) -> (Uuid, crate::domain::Order) {
        let product = testutil::product(stock, price);
        let product_id = product.id;
        store.insert_product(product);
        let order = store
            .create(testutil::new_order(&[(product_id, 1, price)]))
            .await
            .unwrap();
        (product_id, order)
    }

    #[tokio::test]
    async fn approved_pays_and_notifies_exactly_once() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;

        let first = f.service.reconcile(order.id, "approved").await.unwrap();
        assert!(first.transitioned);
        assert_eq!(first.order.payment_status, PaymentStatus::Paid);
        assert_eq!(first.order.status, OrderStatus::Confirmed);
        assert_eq!(f.notifier.calls(), 1);

        let second = f.service.reconcile(order.id, "approved").await.unwrap();
        assert!(!second.transitioned);
        assert_eq!(second.order.payment_status, PaymentStatus::Paid);
        assert_eq!(f.notifier.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_cancels_without_restocking() {
        let f = fixture();
        let (product_id, order) = seeded_order(&f.store, 5, 10_000).await;
        assert_eq!(f.store.stock(product_id).await.unwrap(), Some(4));

        let outcome = f.service.reconcile(order.id, "rejected").await.unwrap();
        assert!(!outcome.transitioned);
        assert_eq!(outcome.order.payment_status, PaymentStatus::Failed);
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(f.notifier.calls(), 0);
        // Reservation is not released on failure.
        assert_eq!(f.store.stock(product_id).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn pending_never_reverts_a_paid_order() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.service.reconcile(order.id, "approved").await.unwrap();

        let outcome = f.service.reconcile(order.id, "in_process").await.unwrap();
        assert!(!outcome.transitioned);
        assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
        assert_eq!(outcome.order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn charge_back_refunds_a_paid_order() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.service.reconcile(order.id, "approved").await.unwrap();

        let outcome = f.service.reconcile(order.id, "charged_back").await.unwrap();
        assert_eq!(outcome.order.payment_status, PaymentStatus::Refunded);
        // Refund keeps the confirmed order status (mapping leaves it unchanged).
        assert_eq!(outcome.order.status, OrderStatus::Confirmed);
        assert_eq!(f.notifier.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_order_is_reported() {
        let f = fixture();
        let err = f.service.reconcile(Uuid::now_v7(), "approved").await.unwrap_err();
        assert!(matches!(err, ReconcileError::OrderNotFound));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_reconciliation() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.notifier.fail_next();

        let outcome = f.service.reconcile(order.id, "approved").await.unwrap();
        assert!(outcome.transitioned);
        assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_reconciliations_transition_exactly_once() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        let service = Arc::new(f.service);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let order_id = order.id;
            handles.push(tokio::spawn(async move {
                service.reconcile(order_id, "approved").await
            }));
        }

        let mut transitions = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
            if outcome.transitioned {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
        assert_eq!(f.notifier.calls(), 1);
    }

    #[test]
    fn classifies_the_three_delivery_shapes() {
        let empty = HashMap::new();
        assert_eq!(
            classify_webhook(&json!({"type": "payment", "data": {"id": 123}}), &empty),
            WebhookEvent::Payment {
                payment_id: "123".into()
            }
        );
        assert_eq!(
            classify_webhook(&json!({"data": {"id": "456"}}), &empty),
            WebhookEvent::Payment {
                payment_id: "456".into()
            }
        );
        let query = HashMap::from([
            ("type".to_string(), "payment".to_string()),
            ("data.id".to_string(), "789".to_string()),
        ]);
        assert_eq!(
            classify_webhook(&serde_json::Value::Null, &query),
            WebhookEvent::Payment {
                payment_id: "789".into()
            }
        );
        assert_eq!(
            classify_webhook(&json!({"id": 42}), &empty),
            WebhookEvent::Payment {
                payment_id: "42".into()
            }
        );
    }

    #[test]
    fn non_payment_topics_are_ignored() {
        let empty = HashMap::new();
        assert_eq!(
            classify_webhook(&json!({"topic": "merchant_order"}), &empty),
            WebhookEvent::NotPayment {
                topic: Some("merchant_order".into())
            }
        );
        assert_eq!(
            classify_webhook(&serde_json::Value::Null, &empty),
            WebhookEvent::NotPayment { topic: None }
        );
        assert_eq!(
            classify_webhook(&json!({"type": "payment"}), &empty),
            WebhookEvent::MissingPaymentId
        );
    }

    #[tokio::test]
    async fn webhook_acks_gateway_failures() {
        let f = fixture();
        f.gateway.fail();
        let ack = f
            .service
            .handle_webhook(&json!({"type": "payment", "data": {"id": 1}}), &HashMap::new())
            .await;
        assert!(ack.received);
        assert!(ack.error.is_some());
    }

    #[tokio::test]
    async fn webhook_acks_unknown_orders_and_payments() {
        let f = fixture();
        // Payment unknown at the gateway.
        let ack = f
            .service
            .handle_webhook(&json!({"type": "payment", "data": {"id": 1}}), &HashMap::new())
            .await;
        assert!(ack.received);

        // Payment known, but referencing an order we never created.
        f.gateway
            .insert_payment("2", "approved", Some(Uuid::now_v7().to_string()));
        let ack = f
            .service
            .handle_webhook(&json!({"type": "payment", "data": {"id": 2}}), &HashMap::new())
            .await;
        assert!(ack.received);
        assert_eq!(f.notifier.calls(), 0);
    }

    #[tokio::test]
    async fn webhook_reconciles_and_reports_the_new_status() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.gateway
            .insert_payment("77", "approved", Some(order.id.to_string()));

        let ack = f
            .service
            .handle_webhook(&json!({"type": "payment", "data": {"id": 77}}), &HashMap::new())
            .await;
        assert!(ack.received);
        assert_eq!(ack.order_id, Some(order.id));
        assert_eq!(ack.status, Some(PaymentStatus::Paid));
        assert_eq!(f.notifier.calls(), 1);
    }

    #[tokio::test]
    async fn confirm_resolves_by_payment_id() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.gateway
            .insert_payment("88", "approved", Some(order.id.to_string()));

        let outcome = f
            .service
            .confirm(ConfirmPaymentRequest {
                payment_id: Some("88".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(outcome.transitioned);
        assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn confirm_falls_back_to_search_by_order_reference() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.gateway
            .insert_payment("99", "approved", Some(order.id.to_string()));

        let outcome = f
            .service
            .confirm(ConfirmPaymentRequest {
                order_id: Some(order.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
        assert_eq!(f.notifier.calls(), 1);
    }

    #[tokio::test]
    async fn confirm_without_gateway_payment_reports_stored_state() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;

        let outcome = f
            .service
            .confirm(ConfirmPaymentRequest {
                order_id: Some(order.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!outcome.transitioned);
        assert_eq!(outcome.order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn confirm_surfaces_gateway_unavailability() {
        let f = fixture();
        let (_, order) = seeded_order(&f.store, 5, 10_000).await;
        f.gateway.fail();

        let err = f
            .service
            .confirm(ConfirmPaymentRequest {
                order_id: Some(order.id),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Gateway(_)));
    }

    #[tokio::test]
    async fn confirm_with_nothing_resolvable_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .confirm(ConfirmPaymentRequest {
                payment_id: Some("404".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::PaymentNotFound));
    }
}
