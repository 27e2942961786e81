//! Order creation: cart validation, shipping calculation, and the atomic
//! inventory reservation + persistence step.
//!
//! Stock is decremented exactly once, here. A later payment failure does not
//! restock (see DESIGN.md).

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ShippingConfig;
use crate::domain::{
    ContactInfo, DeliveryAddress, DeliveryMethod, Order, ShippingSnapshot,
};
use crate::store::{InventoryStore, NewOrder, NewOrderItem, OrderStore, StoreError};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order must contain at least one item")]
    EmptyCart,
    #[error("customer first name, last name and email are required")]
    MissingCustomer,
    #[error("invalid quantity for product {0}")]
    InvalidQuantity(Uuid),
    #[error("product {0} is not available")]
    ProductUnavailable(Uuid),
    #[error("insufficient stock for product {product_id}: {available} available, {requested} requested")]
    OutOfStock {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },
    #[error("incomplete delivery address: {0} is required")]
    InvalidDeliveryAddress(&'static str),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductUnavailable(id) => Self::ProductUnavailable(id),
            StoreError::OutOfStock {
                product_id,
                available,
                requested,
            } => Self::OutOfStock {
                product_id,
                available,
                requested,
            },
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    pub customer: CustomerRequest,
    #[serde(default)]
    pub delivery: DeliveryRequest,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub rut: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    #[serde(default)]
    pub method: DeliveryMethod,
    pub address: Option<AddressRequest>,
    /// Caller-supplied shipping cost override.
    pub cost: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub region: Option<String>,
    pub comuna: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub apartment_number: Option<String>,
    pub property_type: Option<String>,
    pub additional_info: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

pub struct OrderService {
    inventory: Arc<dyn InventoryStore>,
    orders: Arc<dyn OrderStore>,
    shipping: ShippingConfig,
}

impl OrderService {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        orders: Arc<dyn OrderStore>,
        shipping: ShippingConfig,
    ) -> Self {
        Self {
            inventory,
            orders,
            shipping,
        }
    }

    pub async fn create(&self, request: CreateOrderRequest) -> Result<Order, OrderError> {
        if request.items.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        let customer = &request.customer;
        if customer.first_name.trim().is_empty()
            || customer.last_name.trim().is_empty()
            || customer.email.trim().is_empty()
        {
            return Err(OrderError::MissingCustomer);
        }
        for item in &request.items {
            if item.quantity < 1 {
                return Err(OrderError::InvalidQuantity(item.product_id));
            }
        }

        let ids: Vec<Uuid> = request.items.iter().map(|i| i.product_id).collect();
        let products = self.inventory.find_products(&ids).await?;

        let mut subtotal = 0i64;
        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = products
                .iter()
                .find(|p| p.id == item.product_id)
                .ok_or(OrderError::ProductUnavailable(item.product_id))?;
            if product.stock < item.quantity {
                return Err(OrderError::OutOfStock {
                    product_id: product.id,
                    available: product.stock,
                    requested: item.quantity,
                });
            }
            let total = product.price * i64::from(item.quantity);
            subtotal += total;
            lines.push(NewOrderItem {
                product_id: product.id,
                name: product.name.clone(),
                quantity: item.quantity,
                price: product.price,
                total,
            });
        }

        let (shipping_cost, address) = match request.delivery.method {
            DeliveryMethod::Pickup => (0, None),
            DeliveryMethod::Home => {
                let address = delivery_address(request.delivery.address.as_ref())?;
                let cost = request.delivery.cost.unwrap_or_else(|| {
                    if subtotal >= self.shipping.free_threshold {
                        0
                    } else {
                        self.shipping.flat_fee
                    }
                });
                (cost, Some(address))
            }
        };

        let snapshot = ShippingSnapshot {
            method: request.delivery.method,
            cost: shipping_cost,
            contact: ContactInfo {
                first_name: customer.first_name.clone(),
                last_name: customer.last_name.clone(),
                email: customer.email.clone(),
                phone: customer.phone.clone(),
                rut: customer.rut.clone(),
            },
            address,
            notes: request.notes,
        };

        let order = self
            .orders
            .create(NewOrder {
                id: Uuid::now_v7(),
                total: subtotal + shipping_cost,
                payment_method: request
                    .payment_method
                    .unwrap_or_else(|| "mercadopago".to_string()),
                shipping: snapshot,
                items: lines,
            })
            .await?;
        tracing::info!(order_id = %order.id, total = order.total, "order created");
        Ok(order)
    }
}

fn delivery_address(request: Option<&AddressRequest>) -> Result<DeliveryAddress, OrderError> {
    let request = request.ok_or(OrderError::InvalidDeliveryAddress("address"))?;
    let required = |value: &Option<String>, field: &'static str| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(OrderError::InvalidDeliveryAddress(field))
    };
    let region = required(&request.region, "region")?;
    let comuna = request
        .comuna
        .clone()
        .or_else(|| request.city.clone())
        .filter(|v| !v.trim().is_empty())
        .ok_or(OrderError::InvalidDeliveryAddress("comuna"))?;
    let street = required(&request.street, "street")?;
    let street_number = required(&request.street_number, "streetNumber")?;
    Ok(DeliveryAddress {
        region,
        comuna,
        street,
        street_number,
        apartment_number: request.apartment_number.clone(),
        property_type: request.property_type.clone(),
        additional_info: request.additional_info.clone(),
        postal_code: request.postal_code.clone(),
        country: request.country.clone().unwrap_or_else(|| "CL".to_string()),
    })
}
