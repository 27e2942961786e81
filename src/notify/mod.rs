//! Notification seam. Idempotency is the caller's responsibility: the
//! reconciliation engine invokes [`Notifier::order_paid`] at most once per
//! paid transition and swallows any failure it reports.

pub mod email;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Order;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("could not build message: {0}")]
    Message(String),
    #[error("smtp transport error: {0}")]
    Smtp(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the customer confirmation and the internal sales notification
    /// for a freshly paid order.
    async fn order_paid(&self, order: &Order) -> Result<(), NotifyError>;
}
