//! HTTP surface: axum router, shared state, and the handlers for orders and
//! payments.

pub mod orders;
pub mod payments;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::gateway::PaymentGateway;
use crate::service::{OrderService, ReconcileService};
use crate::store::OrderStore;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub reconcile: Arc<ReconcileService>,
    pub store: Arc<dyn OrderStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub gateway_config: GatewayConfig,
    pub store_name: String,
}

pub fn router(state: AppState) -> Router {
    let store_name = state.store_name.clone();
    Router::new()
        .route(
            "/health",
            get(move || async move { Json(json!({"status": "healthy", "service": store_name})) }),
        )
        .route("/api/orders", post(orders::create_order))
        .route("/api/orders/:id", get(orders::get_order))
        .route("/api/payments/config", get(payments::gateway_config))
        .route("/api/payments/intent", post(payments::create_intent))
        .route(
            "/api/payments/webhook",
            get(payments::webhook_verification).post(payments::webhook),
        )
        .route("/api/payments/confirm", post(payments::confirm))
        .route("/api/payments/status/:order_id", get(payments::payment_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
