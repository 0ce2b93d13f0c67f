//! # Routes
//!
//! Axum router configuration for the push-payment API. The router is the
//! one routing table for every action; it is built once at startup.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - API (CORS enabled for the embedded checkout script):
///   - POST /api/v1/stk-push - Trigger an STK push for the session's order
///   - POST /api/v1/checkout/place-order - Place the session's order
///   - GET  /api/v1/orders/{order_id} - Order snapshot
///   - POST /api/v1/orders/expire - Expire overdue orders
///
/// - Webhooks:
///   - POST /webhook/{provider} - Provider callback, always 200
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/stk-push", post(handlers::stk_push))
        .route("/checkout/place-order", post(handlers::place_order))
        .route("/orders/expire", post(handlers::expire_orders))
        .route("/orders/{order_id}", get(handlers::get_order))
        .layer(cors);

    // Webhook routes (no CORS, raw body)
    let webhook_routes = Router::new().route("/{provider}", post(handlers::provider_webhook));

    Router::new()
        // Health check at root
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        // API v1
        .nest("/api/v1", api_routes)
        // Webhooks
        .nest("/webhook", webhook_routes)
        // Middleware
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        // State
        .with_state(state)
}
