//! Shared fixtures and fakes for the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::{
    ContactInfo, DeliveryMethod, Order, OrderItem, OrderStatus, PaymentStatus, Product,
    ShippingSnapshot,
};
use crate::gateway::{
    GatewayError, GatewayMode, PaymentGateway, PaymentIntent, ProviderPayment, SearchBy,
};
use crate::notify::{Notifier, NotifyError};
use crate::store::{NewOrder, NewOrderItem};

pub fn product(stock: i32, price: i64) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::now_v7(),
        name: "Test product".to_string(),
        price,
        stock,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn contact() -> ContactInfo {
    ContactInfo {
        first_name: "Ana".to_string(),
        last_name: "Rojas".to_string(),
        email: "ana@example.com".to_string(),
        phone: Some("912345678".to_string()),
        rut: None,
    }
}

pub fn new_order(lines: &[(Uuid, i32, i64)]) -> NewOrder {
    let items: Vec<NewOrderItem> = lines
        .iter()
        .map(|&(product_id, quantity, price)| NewOrderItem {
            product_id,
            name: "Test product".to_string(),
            quantity,
            price,
            total: price * i64::from(quantity),
        })
        .collect();
    let total = items.iter().map(|i| i.total).sum();
    NewOrder {
        id: Uuid::now_v7(),
        total,
        payment_method: "mercadopago".to_string(),
        shipping: ShippingSnapshot {
            method: DeliveryMethod::Pickup,
            cost: 0,
            contact: contact(),
            address: None,
            notes: None,
        },
        items,
    }
}

/// A pending pickup order with named lines, bypassing the stores.
pub fn order_with_items(lines: &[(&str, i32, i64)]) -> Order {
    let now = Utc::now();
    let order_id = Uuid::now_v7();
    let items: Vec<OrderItem> = lines
        .iter()
        .map(|&(name, quantity, price)| OrderItem {
            id: Uuid::now_v7(),
            product_id: Uuid::now_v7(),
            name: name.to_string(),
            quantity,
            price,
            total: price * i64::from(quantity),
        })
        .collect();
    let total = items.iter().map(|i| i.total).sum();
    Order {
        id: order_id,
        total,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_method: "mercadopago".to_string(),
        shipping_address: ShippingSnapshot {
            method: DeliveryMethod::Pickup,
            cost: 0,
            contact: contact(),
            address: None,
            notes: None,
        },
        items,
        created_at: now,
        updated_at: now,
    }
}

/// In-memory gateway double. Payments are inserted by tests; `fail()` makes
/// every call report the gateway as unavailable.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, ProviderPayment>>,
    failing: AtomicBool,
}

impl FakeGateway {
    pub fn insert_payment(&self, id: &str, status: &str, external_reference: Option<String>) {
        self.payments.lock().unwrap().insert(
            id.to_string(),
            ProviderPayment {
                id: id.to_string(),
                status: status.to_string(),
                external_reference,
            },
        );
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable("gateway down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "testpay"
    }

    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, GatewayError> {
        self.check()?;
        Ok(PaymentIntent {
            intent_id: format!("pref-{}", order.id),
            redirect_url: format!("https://gateway.test/pay/{}", order.id),
            sandbox_redirect_url: Some(format!("https://sandbox.gateway.test/pay/{}", order.id)),
            mode: GatewayMode::Test,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<ProviderPayment>, GatewayError> {
        self.check()?;
        Ok(self.payments.lock().unwrap().get(payment_id).cloned())
    }

    async fn search_payment(&self, by: SearchBy) -> Result<Option<ProviderPayment>, GatewayError> {
        self.check()?;
        let payments = self.payments.lock().unwrap();
        Ok(match by {
            SearchBy::IntentId(_) => None,
            SearchBy::ExternalReference(reference) => payments
                .values()
                .find(|p| p.external_reference.as_deref() == Some(reference.as_str()))
                .cloned(),
        })
    }
}

/// Counts successful paid notifications; `fail_next()` makes the next call
/// report a delivery failure without counting it.
#[derive(Default)]
pub struct CountingNotifier {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl CountingNotifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn order_paid(&self, _order: &Order) -> Result<(), NotifyError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NotifyError::Smtp("delivery refused".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
