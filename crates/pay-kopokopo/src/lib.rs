//! # pay-kopokopo
//!
//! Kopokopo M-PESA STK push gateway for stk-push-rs.
//!
//! - **KopokopoConfig** - Credential Set from env vars or a TOML file
//! - **TokenManager** - cached OAuth client-credentials tokens
//! - **KopokopoGateway** - `PushGateway` over `/api/v1/incoming_payments`
//! - **webhook** - `X-KopoKopo-Signature` verification and callback decoding
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pay_kopokopo::KopokopoGateway;
//! use pay_core::PushGateway;
//!
//! let gateway = KopokopoGateway::from_env()?;
//!
//! let token = gateway.acquire_token().await?;
//! let outcome = gateway.send_push(&request, &token).await?;
//! ```

pub mod config;
pub mod push;
pub mod token;
pub mod webhook;

/// Provider name used in errors, logs and the callback route
pub const PROVIDER: &str = "kopokopo";

// Re-exports
pub use config::{CredentialSet, KopokopoConfig};
pub use push::{decode_push_response, KopokopoGateway, PAYMENT_CHANNEL};
pub use token::TokenManager;
pub use webhook::{parse_callback, verify_signature, SIGNATURE_HEADER};
