//! # Demo Gateway
//!
//! A credential-free stand-in for a real provider. It drives the same
//! binder, initiator and reconciler as a live gateway, which makes it the
//! "try the checkout without an M-PESA account" mode and the test double.
//!
//! References are sequential under a random per-gateway prefix
//! (`demo_3f9a1c02_1`, `demo_3f9a1c02_2`, ...), so an unsigned callback
//! cannot name a push before it is issued. Callbacks use the flat
//! `{reference, outcome}` shape and are not signed.

use crate::error::{PaymentError, PaymentResult};
use crate::provider::{AccessToken, ProviderCallback, PushGateway, PushOutcome, PushRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

const PROVIDER: &str = "demo";

/// How the demo gateway answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemoMode {
    /// Tokens issue, pushes are accepted
    #[default]
    Accept,
    /// Token requests fail as if the provider were unreachable
    RejectAuth,
    /// Tokens issue, pushes come back without a transaction id
    RejectPush,
}

#[derive(Debug)]
pub struct DemoGateway {
    mode: DemoMode,
    reference_prefix: String,
    token_requests: AtomicU64,
    pushes: AtomicU64,
}

impl Default for DemoGateway {
    fn default() -> Self {
        Self::new(DemoMode::default())
    }
}

impl DemoGateway {
    pub fn new(mode: DemoMode) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self {
            mode,
            reference_prefix: format!("demo_{}", &random[..8]),
            token_requests: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
        }
    }

    /// Builder: fixed reference prefix, for reproducible references
    pub fn with_reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    pub fn reference_prefix(&self) -> &str {
        &self.reference_prefix
    }

    pub fn token_requests(&self) -> u64 {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn pushes_sent(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushGateway for DemoGateway {
    async fn acquire_token(&self) -> PaymentResult<AccessToken> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            DemoMode::RejectAuth => Err(PaymentError::auth(PROVIDER, "token endpoint unreachable")),
            _ => Ok(AccessToken::new("demo-token", Utc::now(), None)),
        }
    }

    async fn send_push(&self, request: &PushRequest, _token: &AccessToken) -> PaymentResult<PushOutcome> {
        let n = self.pushes.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Demo push triggered: order={}, phone={}, amount={}",
            request.order_id,
            request.phone.masked(),
            request.amount.display()
        );

        Ok(match self.mode {
            DemoMode::RejectPush => PushOutcome::Rejected {
                status: 200,
                raw_body: r#"{"data":{}}"#.to_string(),
            },
            _ => PushOutcome::Accepted {
                reference: format!("{}_{}", self.reference_prefix, n),
            },
        })
    }

    async fn verify_callback(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> PaymentResult<ProviderCallback> {
        ProviderCallback::from_flat_json(payload)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
