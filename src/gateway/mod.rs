//! Payment gateway seam. The provider is a black box reached through three
//! calls: create a payment intent, fetch a payment by id, and search a
//! payment by a correlation reference.

pub mod mercadopago;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Order;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    Unconfigured,
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Test,
    Production,
}

/// Gateway-side payment request; `redirect_url` is where the payer completes
/// the payment.
#[derive(Clone, Debug)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub redirect_url: String,
    pub sandbox_redirect_url: Option<String>,
    pub mode: GatewayMode,
}

/// A payment as the provider reports it. `external_reference` carries the
/// order id we attached at intent creation.
#[derive(Clone, Debug)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
}

#[derive(Clone, Debug)]
pub enum SearchBy {
    IntentId(String),
    ExternalReference(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name, recorded on the order as its payment method when an
    /// intent is issued.
    fn name(&self) -> &'static str;

    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, GatewayError>;

    /// `Ok(None)` when the provider does not know the id.
    async fn get_payment(&self, payment_id: &str) -> Result<Option<ProviderPayment>, GatewayError>;

    /// Newest matching payment, if any.
    async fn search_payment(&self, by: SearchBy) -> Result<Option<ProviderPayment>, GatewayError>;
}

/// Providers deliver ids as either JSON strings or numbers.
pub fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
