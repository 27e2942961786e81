//! Postgres-backed stores.
//!
//! The payment-status update is a single guarded UPDATE (self-join exposes the
//! pre-update row), so concurrent reconciliations for the same order are
//! serialized by the row lock and at most one of them observes the
//! pending -> paid transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Order, OrderItem, OrderStatus, PaymentStatus, Product};

use super::{AppliedTransition, InventoryStore, NewOrder, OrderStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, product_id, name, quantity, price, total FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OrderItemRow::into_item).collect())
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    total: i64,
    status: String,
    payment_status: String,
    payment_method: String,
    shipping_address: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Invalid(format!("unknown order status {:?}", self.status)))?;
        let payment_status = PaymentStatus::parse(&self.payment_status).ok_or_else(|| {
            StoreError::Invalid(format!("unknown payment status {:?}", self.payment_status))
        })?;
        let shipping_address = serde_json::from_value(self.shipping_address)
            .map_err(|e| StoreError::Invalid(format!("shipping snapshot: {e}")))?;
        Ok(Order {
            id: self.id,
            total: self.total,
            status,
            payment_status,
            payment_method: self.payment_method,
            shipping_address,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
    quantity: i32,
    price: i64,
    total: i64,
}

impl OrderItemRow {
    fn into_item(self) -> OrderItem {
        OrderItem {
            id: self.id,
            product_id: self.product_id,
            name: self.name,
            quantity: self.quantity,
            price: self.price,
            total: self.total,
        }
    }
}

/// Locks the row before updating it. Under READ COMMITTED, `FOR UPDATE` waits
/// for any concurrent writer and re-reads the committed row, so both the
/// source-state guard and the returned previous status reflect the value the
/// other transaction actually left behind. A plain self-join would re-check
/// the guard against the pre-lock snapshot and let a losing racer through.
const TRANSITION_PAYMENT_SQL: &str = "\
    WITH prev AS ( \
        SELECT payment_status FROM orders WHERE id = $1 FOR UPDATE \
    ) \
    UPDATE orders AS cur \
    SET payment_status = $2, status = COALESCE($3, cur.status), updated_at = NOW() \
    FROM prev \
    WHERE cur.id = $1 AND cur.payment_status = ANY($4) \
    RETURNING cur.id, cur.total, cur.status, cur.payment_status, cur.payment_method, \
              cur.shipping_address, cur.created_at, cur.updated_at, \
              prev.payment_status AS previous_payment_status";

#[derive(sqlx::FromRow)]
struct TransitionRow {
    id: Uuid,
    total: i64,
    status: String,
    payment_status: String,
    payment_method: String,
    shipping_address: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    previous_payment_status: String,
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, name, price, stock, is_active, created_at, updated_at \
             FROM products WHERE id = ANY($1) AND is_active",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn stock(&self, id: Uuid) -> Result<Option<i32>, StoreError> {
        let stock = sqlx::query_scalar::<_, i32>("SELECT stock FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(stock)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;

        for item in &order.items {
            let remaining = sqlx::query_scalar::<_, i32>(
                "UPDATE products SET stock = stock - $2, updated_at = NOW() \
                 WHERE id = $1 AND is_active AND stock >= $2 RETURNING stock",
            )
            .bind(item.product_id)
            .bind(item.quantity)
            .fetch_optional(&mut *tx)
            .await?;

            if remaining.is_none() {
                // Dropping the transaction rolls back every prior decrement.
                let state = sqlx::query_as::<_, (i32, bool)>(
                    "SELECT stock, is_active FROM products WHERE id = $1",
                )
                .bind(item.product_id)
                .fetch_optional(&mut *tx)
                .await?;
                return Err(match state {
                    Some((available, true)) => StoreError::OutOfStock {
                        product_id: item.product_id,
                        available,
                        requested: item.quantity,
                    },
                    _ => StoreError::ProductUnavailable(item.product_id),
                });
            }
        }

        let shipping = serde_json::to_value(&order.shipping)
            .map_err(|e| StoreError::Invalid(format!("shipping snapshot: {e}")))?;
        let row = sqlx::query_as::<_, OrderRow>(
            "INSERT INTO orders (id, total, status, payment_status, payment_method, shipping_address) \
             VALUES ($1, $2, 'pending', 'pending', $3, $4) \
             RETURNING id, total, status, payment_status, payment_method, shipping_address, created_at, updated_at",
        )
        .bind(order.id)
        .bind(order.total)
        .bind(&order.payment_method)
        .bind(&shipping)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let item_row = sqlx::query_as::<_, OrderItemRow>(
                "INSERT INTO order_items (id, order_id, product_id, name, quantity, price, total) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 RETURNING id, product_id, name, quantity, price, total",
            )
            .bind(Uuid::now_v7())
            .bind(order.id)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.price)
            .bind(item.total)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item_row.into_item());
        }

        tx.commit().await?;
        row.into_order(items)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, total, status, payment_status, payment_method, shipping_address, created_at, updated_at \
             FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let items = self.load_items(id).await?;
                row.into_order(items).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        target: PaymentStatus,
        status: Option<OrderStatus>,
    ) -> Result<Option<AppliedTransition>, StoreError> {
        let sources: Vec<String> = PaymentStatus::allowed_sources(target)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        if sources.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, TransitionRow>(TRANSITION_PAYMENT_SQL)
        .bind(id)
        .bind(target.as_str())
        .bind(status.map(OrderStatus::as_str))
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let previous = PaymentStatus::parse(&row.previous_payment_status)
                    .ok_or_else(|| {
                        StoreError::Invalid(format!(
                            "unknown payment status {:?}",
                            row.previous_payment_status
                        ))
                    })?;
                let items = self.load_items(id).await?;
                let order = OrderRow {
                    id: row.id,
                    total: row.total,
                    status: row.status,
                    payment_status: row.payment_status,
                    payment_method: row.payment_method,
                    shipping_address: row.shipping_address,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                }
                .into_order(items)?;
                Ok(Some(AppliedTransition { order, previous }))
            }
            None => Ok(None),
        }
    }

    async fn mark_payment_requested(&self, id: Uuid, method: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET payment_method = $2 WHERE id = $1")
            .bind(id)
            .bind(method)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound);
        }
        Ok(())
    }
}
