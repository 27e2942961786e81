//! Persistence seams for the order/payment subsystem.
//!
//! Services depend on these traits rather than on a concrete database so the
//! reconciliation engine can be exercised against fakes. [`postgres::PgStore`]
//! is the production implementation; [`memory::MemStore`] backs tests and
//! gateway-less local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, PaymentStatus, Product, ShippingSnapshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order not found")]
    OrderNotFound,
    #[error("product {0} is not available")]
    ProductUnavailable(Uuid),
    #[error("insufficient stock for product {product_id}: {available} available, {requested} requested")]
    OutOfStock {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },
    #[error("invalid stored value: {0}")]
    Invalid(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// A validated order ready to be persisted.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub id: Uuid,
    pub total: i64,
    pub payment_method: String,
    pub shipping: ShippingSnapshot,
    pub items: Vec<NewOrderItem>,
}

#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub price: i64,
    pub total: i64,
}

/// Result of a compare-and-set payment transition that actually applied.
#[derive(Clone, Debug)]
pub struct AppliedTransition {
    pub order: Order,
    pub previous: PaymentStatus,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Active products for the given ids, in one pass.
    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;

    /// Current stock counter, active or not.
    async fn stock(&self, id: Uuid) -> Result<Option<i32>, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Atomically reserves inventory for every line (all-or-nothing, floored
    /// at zero) and persists the order with its items in the same unit of
    /// work. Fails with [`StoreError::OutOfStock`] or
    /// [`StoreError::ProductUnavailable`] without any partial decrement.
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Compare-and-set status update: applies `(target, status)` only when
    /// the stored payment status is one of
    /// [`PaymentStatus::allowed_sources`]`(target)`, as a single linearizable
    /// step per order id. Returns `Ok(None)` when nothing matched, which is
    /// either an idempotent no-op or a missing order; callers disambiguate
    /// with [`OrderStore::get`].
    async fn transition_payment(
        &self,
        id: Uuid,
        target: PaymentStatus,
        status: Option<OrderStatus>,
    ) -> Result<Option<AppliedTransition>, StoreError>;

    /// Records the gateway chosen for the order when a payment intent is
    /// issued.
    async fn mark_payment_requested(&self, id: Uuid, method: &str) -> Result<(), StoreError>;
}
