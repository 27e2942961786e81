//! MercadoPago adapter. Pure translation between our order model and the
//! provider's preference/payment API; holds no state beyond configuration.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::config::GatewayConfig;
use crate::domain::{DeliveryMethod, Order};

use super::{json_id, GatewayError, GatewayMode, PaymentGateway, PaymentIntent, ProviderPayment, SearchBy};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MercadoPagoGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl MercadoPagoGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    fn token(&self) -> Result<&str, GatewayError> {
        self.config
            .access_token
            .as_deref()
            .ok_or(GatewayError::Unconfigured)
    }

    pub fn mode(&self) -> GatewayMode {
        self.config.mode()
    }

    fn preference_body(&self, order: &Order) -> serde_json::Value {
        let shipping = &order.shipping_address;
        let contact = &shipping.contact;

        let success_url = format!(
            "{}/checkout/success?orderId={}",
            self.config.frontend_url, order.id
        );
        let failure_url = format!(
            "{}/checkout/failure?orderId={}",
            self.config.frontend_url, order.id
        );
        let pending_url = format!(
            "{}/checkout/pending?orderId={}",
            self.config.frontend_url, order.id
        );

        let items: Vec<serde_json::Value> = order
            .items
            .iter()
            .map(|item| {
                json!({
                    "title": item.name,
                    "quantity": item.quantity,
                    "unit_price": item.price,
                    "currency_id": self.config.currency,
                })
            })
            .collect();

        let payer_name = format!("{} {}", contact.first_name, contact.last_name);
        let mut body = json!({
            "items": items,
            "payer": {
                "name": payer_name.trim(),
                "email": contact.email,
                "phone": {
                    "area_code": "56",
                    "number": contact.phone.as_deref().map(sanitize_phone),
                },
            },
            "back_urls": {
                "success": success_url,
                "failure": failure_url,
                "pending": pending_url,
            },
            "external_reference": order.id,
            "notification_url": self.config.webhook_url,
            "metadata": {
                "order_id": order.id,
                "shipping_method": shipping.method,
            },
            "statement_descriptor": self.config.statement_descriptor,
            "payment_methods": {
                "excluded_payment_types": [{"id": "ticket"}],
            },
        });

        // The provider only honors auto_return for HTTPS back URLs.
        if success_url.starts_with("https://") {
            body["auto_return"] = json!("approved");
        }

        if shipping.method == DeliveryMethod::Home {
            let address = shipping.address.as_ref();
            body["shipments"] = json!({
                "mode": "not_specified",
                "cost": shipping.cost,
                "receiver_address": {
                    "zip_code": address.and_then(|a| a.postal_code.as_deref()).unwrap_or(""),
                    "street_name": address.map(|a| a.street.as_str()).unwrap_or(""),
                    "street_number": address.map(|a| a.street_number.as_str()).unwrap_or(""),
                    "city_name": address.map(|a| a.comuna.as_str()).unwrap_or(""),
                    "state_name": address.map(|a| a.region.as_str()).unwrap_or(""),
                    "country_name": address.map(|a| a.country.as_str()).unwrap_or("CL"),
                },
            });
        }

        body
    }
}

/// Keep digits only and strip the national prefix the provider adds itself.
fn sanitize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .strip_prefix("56")
        .map(str::to_string)
        .unwrap_or(digits)
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

#[derive(Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
    sandbox_init_point: Option<String>,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: serde_json::Value,
    status: String,
    external_reference: Option<String>,
}

impl PaymentResponse {
    fn into_payment(self) -> ProviderPayment {
        ProviderPayment {
            id: json_id(&self.id).unwrap_or_default(),
            status: self.status,
            external_reference: self.external_reference,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<PaymentResponse>,
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, GatewayError> {
        let token = self.token()?.to_string();
        let body = self.preference_body(order);
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.config.base_url))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "preference request failed with {}",
                response.status()
            )));
        }
        let preference: PreferenceResponse = response.json().await?;
        Ok(PaymentIntent {
            intent_id: preference.id,
            redirect_url: preference.init_point,
            sandbox_redirect_url: preference.sandbox_init_point,
            mode: self.mode(),
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<ProviderPayment>, GatewayError> {
        let token = self.token()?.to_string();
        let response = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.config.base_url))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "payment lookup failed with {}",
                response.status()
            )));
        }
        let payment: PaymentResponse = response.json().await?;
        Ok(Some(payment.into_payment()))
    }

    async fn search_payment(&self, by: SearchBy) -> Result<Option<ProviderPayment>, GatewayError> {
        let token = self.token()?.to_string();
        let (key, value) = match &by {
            SearchBy::IntentId(id) => ("preference_id", id.as_str()),
            SearchBy::ExternalReference(reference) => ("external_reference", reference.as_str()),
        };
        let response = self
            .http
            .get(format!("{}/v1/payments/search", self.config.base_url))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("sort", "date_created"), ("criteria", "desc"), (key, value)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "payment search failed with {}",
                response.status()
            )));
        }
        let search: SearchResponse = response.json().await?;
        Ok(search.results.into_iter().next().map(PaymentResponse::into_payment))
    }
}
