use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, PaymentStatus};
use crate::error::ApiError;
use crate::gateway::GatewayMode;
use crate::service::reconcile::WebhookAck;
use crate::service::ConfirmPaymentRequest;

use super::AppState;

/// Public gateway settings the frontend needs to start a checkout.
pub async fn gateway_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.gateway_config;
    Json(json!({
        "configured": config.is_configured(),
        "publicKey": config.public_key,
        "mode": config.mode(),
        "currency": config.currency,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub intent_id: String,
    pub redirect_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_redirect_url: Option<String>,
    pub public_key: Option<String>,
    pub mode: GatewayMode,
}

pub async fn create_intent(
    State(state): State<AppState>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, ApiError> {
    let order = state
        .store
        .get(request.order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;
    if order.payment_status != PaymentStatus::Pending {
        return Err(ApiError::conflict(format!(
            "order is already {}",
            order.payment_status
        )));
    }

    let intent = state.gateway.create_intent(&order).await?;
    state
        .store
        .mark_payment_requested(order.id, state.gateway.name())
        .await?;
    tracing::info!(order_id = %order.id, intent_id = %intent.intent_id, "payment intent created");

    Ok(Json(CreateIntentResponse {
        intent_id: intent.intent_id,
        redirect_url: intent.redirect_url,
        sandbox_redirect_url: intent.sandbox_redirect_url,
        public_key: state.gateway_config.public_key.clone(),
        mode: intent.mode,
    }))
}

/// Gateway webhook. Infallible by contract: the provider retries on any
/// non-200, so malformed payloads and internal failures are acknowledged.
pub async fn webhook(
    State(state): State<AppState>,
    query: Option<Query<HashMap<String, String>>>,
    body: Bytes,
) -> Json<WebhookAck> {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    Json(state.reconcile.handle_webhook(&body, &query).await)
}

/// Some providers verify the webhook URL with a GET before accepting it.
pub async fn webhook_verification() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub order: Order,
    pub payment_status: PaymentStatus,
    /// True when this call performed the transition to paid.
    pub transitioned: bool,
}

pub async fn confirm(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    if request.is_empty() {
        return Err(ApiError::validation(
            "paymentId, orderId or preferenceId is required",
        ));
    }
    let outcome = state.reconcile.confirm(request).await?;
    Ok(Json(ConfirmResponse {
        payment_status: outcome.order.payment_status,
        order: outcome.order,
        transitioned: outcome.transitioned,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: i64,
    pub created_at: DateTime<Utc>,
}

/// Read-only poll; never touches the gateway.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let order = state
        .store
        .get(order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;
    Ok(Json(PaymentStatusResponse {
        id: order.id,
        status: order.status,
        payment_status: order.payment_status,
        total: order.total,
        created_at: order.created_at,
    }))
}
