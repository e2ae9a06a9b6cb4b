//! HTTP API server for order lifecycle and payment reconciliation.
//!
//! Provides REST endpoints for placing and tracking orders, admin
//! fulfillment updates, provider charges and provider callbacks, with
//! structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use auth::{Authenticated, JwtAccessGate};
pub use config::Config;
pub use state::{AppState, SharedGateway, create_default_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list_all::<S>),
        )
        .route("/orders/mine", get(routes::orders::list_mine::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", put(routes::orders::update_status::<S>))
        .route(
            "/orders/{id}/payment",
            put(routes::orders::update_payment::<S>),
        )
        .route(
            "/orders/{id}/payments",
            post(routes::orders::initiate_payment::<S>),
        )
        .route(
            "/payments/mpesa/callback",
            post(routes::payments::mpesa_callback::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
