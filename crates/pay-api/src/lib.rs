//! # pay-api
//!
//! HTTP API layer for stk-push-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Shopper push trigger and checkout endpoints
//! - Provider callback endpoint
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/stk-push` | Send an STK push for the session's order |
//! | POST | `/api/v1/checkout/place-order` | Place the session's order |
//! | GET | `/api/v1/orders/{order_id}` | Order snapshot |
//! | POST | `/api/v1/orders/expire` | Expire overdue orders |
//! | POST | `/webhook/{provider}` | Provider callback |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState, ProviderKind};
