//! Application services. `orders` owns checkout (validation, shipping,
//! atomic reservation); `reconcile` owns payment state convergence.

pub mod orders;
pub mod reconcile;

pub use orders::{CreateOrderRequest, OrderError, OrderService};
pub use reconcile::{ConfirmPaymentRequest, ReconcileError, ReconcileService};
