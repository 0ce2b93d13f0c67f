//! # pay-core
//!
//! Core types and orchestration for the stk-push payment engine.
//!
//! This crate provides:
//! - `PushGateway` trait for implementing mobile-money push providers
//! - `Phone` normalization to the provider's international format
//! - `Order`, `OrderStatus` and the order state machine
//! - `OrderStore` / `SessionStore` traits with in-memory implementations
//! - `SessionBinder`, `PushInitiator` and `CallbackReconciler`
//! - `PaymentService`, which wires them together
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use pay_core::{PaymentService, ServiceSettings, InMemoryOrderStore, InMemorySessionStore};
//!
//! let service = PaymentService::new(gateway, Arc::new(orders), Arc::new(sessions), ServiceSettings::default());
//!
//! // Shopper pressed "Pay Now"
//! let ack = service.request_push(&session_id, "0722000111", Some("500")).await?;
//!
//! // Later, the provider calls back
//! let reply = service.handle_callback(&body, signature).await;
//! ```

pub mod binder;
pub mod demo;
pub mod error;
pub mod initiator;
pub mod locks;
pub mod money;
pub mod order;
pub mod phone;
pub mod provider;
pub mod reconciler;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use binder::SessionBinder;
pub use demo::{DemoGateway, DemoMode};
pub use error::{PaymentError, PaymentResult};
pub use initiator::{PushAck, PushInitiator};
pub use locks::KeyedLocks;
pub use money::{Currency, Price};
pub use order::{Order, OrderEvent, OrderId, OrderStatus, Transition};
pub use phone::Phone;
pub use provider::{
    AccessToken, CallbackOutcome, ProviderCallback, PushGateway, PushOutcome, PushRequest,
    SharedGateway,
};
pub use reconciler::{CallbackReconciler, ReconcileOutcome};
pub use service::{CallbackAck, PaymentService, ServiceSettings};
pub use store::{InMemoryOrderStore, InMemorySessionStore, OrderStore, SessionStore};
