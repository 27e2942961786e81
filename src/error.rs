//! HTTP error envelope. Every failure surfaces as `{"error": "..."}` with a
//! status derived from the underlying service error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::gateway::GatewayError;
use crate::service::{OrderError, ReconcileError};
use crate::store::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound => Self::not_found(err.to_string()),
            StoreError::ProductUnavailable(_) => Self::validation(err.to_string()),
            StoreError::OutOfStock { .. } => Self::conflict(err.to_string()),
            StoreError::Invalid(_) => Self::validation(err.to_string()),
            StoreError::Database(_) => Self::internal("internal error"),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::EmptyCart
            | OrderError::MissingCustomer
            | OrderError::InvalidQuantity(_)
            | OrderError::ProductUnavailable(_)
            | OrderError::InvalidDeliveryAddress(_) => Self::validation(err.to_string()),
            OrderError::OutOfStock { .. } => Self::conflict(err.to_string()),
            OrderError::Store(inner) => inner.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self::unavailable(err.to_string())
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::OrderNotFound
            | ReconcileError::PaymentNotFound
            | ReconcileError::UnresolvedOrder => Self::not_found(err.to_string()),
            ReconcileError::Gateway(inner) => inner.into(),
            ReconcileError::Store(inner) => inner.into(),
        }
    }
}
