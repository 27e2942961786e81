//! Normalization of gateway payment states into the order state machine.
//!
//! This table is the single source of truth: every reconciliation entry point
//! routes through [`normalize_provider_status`], and the order `status` field
//! is never written except through the mapping it produces.

use super::order::{OrderStatus, PaymentStatus};

/// Candidate `(paymentStatus, status)` pair derived from a raw provider
/// status. `status: None` means "leave the order status unchanged".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusMapping {
    pub payment: PaymentStatus,
    pub status: Option<OrderStatus>,
}

pub fn normalize_provider_status(provider: &str) -> StatusMapping {
    match provider {
        "approved" => StatusMapping {
            payment: PaymentStatus::Paid,
            status: Some(OrderStatus::Confirmed),
        },
        "rejected" | "cancelled" => StatusMapping {
            payment: PaymentStatus::Failed,
            status: Some(OrderStatus::Cancelled),
        },
        "refunded" | "charged_back" => StatusMapping {
            payment: PaymentStatus::Refunded,
            status: None,
        },
        "in_process" | "pending" | "authorized" => StatusMapping {
            payment: PaymentStatus::Pending,
            status: None,
        },
        other => {
            tracing::debug!(provider_status = other, "unknown provider status, treating as pending");
            StatusMapping {
                payment: PaymentStatus::Pending,
                status: None,
            }
        }
    }
}

impl PaymentStatus {
    /// Stored states from which a compare-and-set transition to `target` may
    /// apply. Pending is never a target (a pending-mapped provider status is
    /// an idempotent no-op), paid can only be reached from pending, and the
    /// only way out of paid is a refund. Nothing leaves failed or refunded.
    pub fn allowed_sources(target: PaymentStatus) -> &'static [PaymentStatus] {
        match target {
            PaymentStatus::Pending => &[],
            PaymentStatus::Paid => &[PaymentStatus::Pending],
            PaymentStatus::Failed => &[PaymentStatus::Pending],
            PaymentStatus::Refunded => &[PaymentStatus::Pending, PaymentStatus::Paid],
        }
    }
}
