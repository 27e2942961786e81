//! Domain types for the order/payment subsystem.

pub mod order;
pub mod product;
pub mod status;

pub use order::{
    ContactInfo, DeliveryAddress, DeliveryMethod, Order, OrderItem, OrderStatus, PaymentStatus,
    ShippingSnapshot,
};
pub use product::Product;
pub use status::{normalize_provider_status, StatusMapping};
