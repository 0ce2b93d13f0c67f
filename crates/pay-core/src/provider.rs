//! # Push Gateway Trait
//!
//! The seam between the orchestration engine and a mobile-money provider.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PushGateway (trait)                      │
//! │  ├── acquire_token()                                        │
//! │  ├── send_push()                                            │
//! │  ├── verify_callback()                                      │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                  ┌─────────┴─────────┐
//!                  │                   │
//!          ┌───────┴───────┐   ┌───────┴───────┐
//!          │KopokopoGateway│   │  DemoGateway  │
//!          │ (pay-kopokopo)│   │  (pay-core)   │
//!          └───────────────┘   └───────────────┘
//! ```

use crate::error::{PaymentError, PaymentResult};
use crate::money::Price;
use crate::order::OrderId;
use crate::phone::Phone;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// OAuth bearer token issued by a provider.
///
/// Lives in process memory only; `Debug` never prints the value.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    obtained_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// `expires_in` is whatever lifetime the provider reported, if any
    pub fn new(value: impl Into<String>, obtained_at: DateTime<Utc>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            obtained_at,
            expires_at: expires_in.map(|ttl| obtained_at + ttl),
        }
    }

    /// Value for the `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.value)
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Usable at `now`: younger than `max_age` and before any provider expiry
    pub fn is_fresh_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.obtained_at < max_age && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One push attempt. Built fresh per attempt and dropped after the provider answers.
///
/// Merchant till and callback URL are added by the gateway from its credentials.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub order_id: OrderId,
    pub phone: Phone,
    pub amount: Price,
}

/// Decoded provider answer to a push request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted for processing; `reference` correlates the later callback
    Accepted { reference: String },
    /// Anything else, including a 2xx without a transaction id
    Rejected { status: u16, raw_body: String },
}

/// Outcome reported by a provider callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success,
    Failure,
    /// Intermediate or unknown status; does not move the order
    Other(String),
}

impl CallbackOutcome {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("success") || trimmed.eq_ignore_ascii_case("succeeded") {
            CallbackOutcome::Success
        } else if trimmed.eq_ignore_ascii_case("failed") || trimmed.eq_ignore_ascii_case("failure") {
            CallbackOutcome::Failure
        } else {
            CallbackOutcome::Other(trimmed.to_string())
        }
    }
}

/// A decoded provider callback.
///
/// Only `reference` and `outcome` drive state changes; `metadata` is kept
/// for logging and never trusted.
#[derive(Debug, Clone)]
pub struct ProviderCallback {
    pub reference: String,
    pub outcome: CallbackOutcome,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FlatCallback {
    reference: String,
    outcome: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl ProviderCallback {
    /// Decode the flat `{reference, outcome, metadata?}` shape
    pub fn from_flat_json(payload: &[u8]) -> PaymentResult<Self> {
        let flat: FlatCallback = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::WebhookParseError(format!("Failed to parse callback: {}", e)))?;

        if flat.reference.trim().is_empty() {
            return Err(PaymentError::WebhookParseError(
                "Callback reference is empty".to_string(),
            ));
        }

        Ok(Self {
            reference: flat.reference,
            outcome: CallbackOutcome::parse(&flat.outcome),
            metadata: flat.metadata,
        })
    }
}

/// Core trait for mobile-money push providers.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Obtain a bearer token, from cache when still fresh.
    async fn acquire_token(&self) -> PaymentResult<AccessToken>;

    /// Send one push request authenticated with `token`.
    ///
    /// Transport failures are `Err(ProviderError)`; a provider answer that is
    /// not a recognized acceptance is `Ok(PushOutcome::Rejected)`.
    async fn send_push(&self, request: &PushRequest, token: &AccessToken) -> PaymentResult<PushOutcome>;

    /// Authenticate (when configured) and decode an inbound callback.
    async fn verify_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<ProviderCallback>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;

    /// Get the callback endpoint path for this provider.
    /// Default: `/webhook/{provider_name}`
    fn callback_path(&self) -> String {
        format!("/webhook/{}", self.provider_name())
    }
}

/// Type alias for a shared gateway (dynamic dispatch)
pub type SharedGateway = Arc<dyn PushGateway>;
