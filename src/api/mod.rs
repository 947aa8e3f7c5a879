//! HTTP surface

pub mod auth;
pub mod cart;
pub mod orders;
pub mod payments;

use crate::database::user_repository::UserDirectory;
use crate::error::AppError;
use crate::health::{self, HealthChecker};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{CartService, OrderAssemblyService, PaymentCallbackReconciler};
use axum::extract::FromRef;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderAssemblyService>,
    pub callbacks: Arc<PaymentCallbackReconciler>,
    pub carts: Arc<CartService>,
    pub users: Arc<dyn UserDirectory>,
    pub health: HealthChecker,
}

impl FromRef<AppState> for HealthChecker {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

/// Attach the request id so error bodies can be correlated with logs
pub(crate) fn tag_error(headers: &HeaderMap) -> impl Fn(AppError) -> AppError + '_ {
    move |err| match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// Every route with request-id and logging layers applied
pub fn router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .with_state(state.health.clone());

    Router::new()
        .route("/orders", post(orders::create_guest_order))
        .route("/orders/from-cart", post(orders::create_order_from_cart))
        .route("/orders/{id}", get(orders::get_order).delete(orders::deactivate_order))
        .route("/orders/{id}/status", post(orders::update_order_status))
        .route("/orders/{id}/payment", post(orders::retry_payment))
        .route("/orders/{id}/invoice", get(orders::download_invoice))
        .route("/payments/callback", post(payments::mpesa_callback))
        .route("/payments/status/{checkout_request_id}", get(payments::payment_status))
        .route("/cart", get(cart::get_cart).post(cart::add_to_cart))
        .with_state(state)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
