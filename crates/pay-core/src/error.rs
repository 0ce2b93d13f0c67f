//! # Payment Error Types
//!
//! Typed error handling for the push-payment engine.
//! All payment operations return `Result<T, PaymentError>`.
//!
//! Timeouts and connection failures never surface as their own variant: the
//! token manager reports them as `Auth`, the push client as `ProviderError`.

use crate::order::{OrderEvent, OrderStatus};
use thiserror::Error;

/// Core error type for all payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing credentials, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Phone number failed validation; rejected before any network call
    #[error("Invalid phone number: {0}")]
    Validation(String),

    /// Access token could not be obtained from the provider
    #[error("Authentication with {provider} failed: {message}")]
    Auth { provider: String, message: String },

    /// Push request failed or came back in an unrecognized shape
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// No order with this id (or reference) exists in the order store
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The shopper session has no bound order
    #[error("No order bound to session: {session_id}")]
    SessionNotFound { session_id: String },

    /// The order state machine does not allow this event
    #[error("Order in status {from} cannot accept {event}")]
    InvalidTransition { from: OrderStatus, event: OrderEvent },

    /// Callback signature verification failed
    #[error("Callback verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Callback payload could not be decoded
    #[error("Callback parse error: {0}")]
    WebhookParseError(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PaymentError {
    /// Build an `Auth` error for a provider
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a `ProviderError` for a provider
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::Validation(_) => 400,
            PaymentError::Auth { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::OrderNotFound(_) => 404,
            PaymentError::SessionNotFound { .. } => 404,
            PaymentError::InvalidTransition { .. } => 409,
            PaymentError::WebhookVerificationFailed(_) => 401,
            PaymentError::WebhookParseError(_) => 400,
            PaymentError::Internal(_) => 500,
            PaymentError::Serialization(_) => 500,
        }
    }

    /// Short message that is safe to show to a shopper.
    ///
    /// Never includes provider bodies, credentials or internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => {
                "Please enter a valid M-PESA phone number (e.g., 07XXXXXXXX)"
            }
            PaymentError::Auth { .. } => "Authentication failed",
            PaymentError::ProviderError { .. } => "STK Push failed",
            PaymentError::OrderNotFound(_) => "Order not found",
            PaymentError::SessionNotFound { .. } => "Please complete payment before placing the order",
            PaymentError::InvalidTransition { event, .. } => match event {
                OrderEvent::OrderPlaced => "Please complete payment before placing the order",
                _ => "Payment can no longer be requested for this order",
            },
            _ => "An internal error occurred. Please try again",
        }
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
