//! In-memory stores with the same transition semantics as Postgres. Used by
//! the test suite and for running the service without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, PaymentStatus, Product};

use super::{AppliedTransition, InventoryStore, NewOrder, OrderStore, StoreError};

#[derive(Default)]
pub struct MemStore {
    products: Mutex<HashMap<Uuid, Product>>,
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) {
        self.products.lock().unwrap().insert(product.id, product);
    }
}

#[async_trait]
impl InventoryStore for MemStore {
    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let products = self.products.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| products.get(id))
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn stock(&self, id: Uuid) -> Result<Option<i32>, StoreError> {
        Ok(self.products.lock().unwrap().get(&id).map(|p| p.stock))
    }
}

#[async_trait]
impl OrderStore for MemStore {
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError> {
        {
            let mut products = self.products.lock().unwrap();

            // Validate the whole reservation before mutating anything so a
            // failing line leaves no partial decrement.
            let mut reserved: HashMap<Uuid, i32> = HashMap::new();
            for item in &order.items {
                let product = products
                    .get(&item.product_id)
                    .filter(|p| p.is_active)
                    .ok_or(StoreError::ProductUnavailable(item.product_id))?;
                let already = reserved.entry(item.product_id).or_insert(0);
                let available = product.stock - *already;
                if available < item.quantity {
                    return Err(StoreError::OutOfStock {
                        product_id: item.product_id,
                        available,
                        requested: item.quantity,
                    });
                }
                *already += item.quantity;
            }
            for (id, quantity) in reserved {
                if let Some(product) = products.get_mut(&id) {
                    product.stock -= quantity;
                    product.updated_at = Utc::now();
                }
            }
        }

        let now = Utc::now();
        let stored = Order {
            id: order.id,
            total: order.total,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: order.payment_method,
            shipping_address: order.shipping,
            items: order
                .items
                .into_iter()
                .map(|item| crate::domain::OrderItem {
                    id: Uuid::now_v7(),
                    product_id: item.product_id,
                    name: item.name,
                    quantity: item.quantity,
                    price: item.price,
                    total: item.total,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };
        self.orders.lock().unwrap().insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        target: PaymentStatus,
        status: Option<OrderStatus>,
    ) -> Result<Option<AppliedTransition>, StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&id) else {
            return Ok(None);
        };
        if !PaymentStatus::allowed_sources(target).contains(&order.payment_status) {
            return Ok(None);
        }
        let previous = order.payment_status;
        order.payment_status = target;
        if let Some(status) = status {
            order.status = status;
        }
        order.updated_at = Utc::now();
        Ok(Some(AppliedTransition {
            order: order.clone(),
            previous,
        }))
    }

    async fn mark_payment_requested(&self, id: Uuid, method: &str) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound)?;
        order.payment_method = method.to_string();
        Ok(())
    }
}
