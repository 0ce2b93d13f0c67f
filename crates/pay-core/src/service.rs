//! # Payment Service
//!
//! Wires the phone normalizer, session binder, gateway token cache, push
//! initiator and callback reconciler into the operations the HTTP layer
//! exposes. Every operation is a short, independent unit of work; there is
//! no background task.

use crate::binder::SessionBinder;
use crate::error::{PaymentError, PaymentResult};
use crate::initiator::{PushAck, PushInitiator};
use crate::locks::KeyedLocks;
use crate::order::{Order, OrderEvent, OrderId};
use crate::phone::Phone;
use crate::provider::SharedGateway;
use crate::reconciler::{CallbackReconciler, ReconcileOutcome};
use crate::store::{OrderStore, SessionStore};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Default confirmation window before a pushed order expires (15 minutes)
pub const DEFAULT_CONFIRMATION_WINDOW_SECS: i64 = 900;

/// Tunables for the service
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// How long a pushed order may wait for its callback
    pub confirmation_window: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            confirmation_window: Duration::seconds(DEFAULT_CONFIRMATION_WINDOW_SECS),
        }
    }
}

/// Acknowledgement returned to the provider for every callback
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CallbackAck {
    pub status: &'static str,
    pub message: String,
}

impl CallbackAck {
    fn from_outcome(outcome: &ReconcileOutcome) -> Self {
        let status = match outcome {
            ReconcileOutcome::Applied { .. } => "processed",
            ReconcileOutcome::Duplicate { .. } => "duplicate",
            ReconcileOutcome::Parked { .. } | ReconcileOutcome::Unmatched { .. } => "unmatched",
            ReconcileOutcome::Ignored { .. } => "ignored",
        };
        Self {
            status,
            message: outcome.describe(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: "ignored",
            message: message.into(),
        }
    }
}

pub struct PaymentService {
    gateway: SharedGateway,
    orders: Arc<dyn OrderStore>,
    order_locks: Arc<KeyedLocks>,
    binder: SessionBinder,
    initiator: PushInitiator,
    reconciler: CallbackReconciler,
}

impl PaymentService {
    pub fn new(
        gateway: SharedGateway,
        orders: Arc<dyn OrderStore>,
        sessions: Arc<dyn SessionStore>,
        settings: ServiceSettings,
    ) -> Self {
        let order_locks = Arc::new(KeyedLocks::new());

        Self {
            binder: SessionBinder::new(sessions, orders.clone()),
            initiator: PushInitiator::new(gateway.clone(), orders.clone(), order_locks.clone()),
            reconciler: CallbackReconciler::new(
                orders.clone(),
                order_locks.clone(),
                settings.confirmation_window,
            ),
            gateway,
            orders,
            order_locks,
        }
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    pub fn confirmation_window(&self) -> Duration {
        self.reconciler.confirmation_window()
    }

    /// Shopper pressed "Pay Now".
    ///
    /// `claimed_amount` is what the checkout page displayed. It is logged and
    /// never charged; the charge is the bound order's total.
    #[instrument(skip(self, raw_phone, claimed_amount), fields(provider = self.gateway.provider_name()))]
    pub async fn request_push(
        &self,
        session_id: &str,
        raw_phone: &str,
        claimed_amount: Option<&str>,
    ) -> PaymentResult<PushAck> {
        let phone = Phone::normalize(raw_phone)?;
        let order = self.binder.bind(session_id, &phone).await?;

        if let Some(claimed) = claimed_amount {
            info!(
                "Push requested for order {} (page showed {}, order total {})",
                order.id,
                claimed,
                order.total.display()
            );
        }

        // Refuse a finished order before spending a token request on it.
        order.status.transition(OrderEvent::PushAccepted)?;

        let token = self.gateway.acquire_token().await?;
        let ack = self.initiator.initiate(&order, &phone, &token).await?;

        if let Some(outcome) = self.reconciler.replay_parked(&ack.reference).await {
            info!("Early callback applied: {}", outcome.describe());
            let order = self.orders.get_order(&ack.order_id).await?;
            return Ok(PushAck {
                status: order.status,
                ..ack
            });
        }

        Ok(ack)
    }

    /// Shopper submitted checkout ("place order") after pushing.
    #[instrument(skip(self))]
    pub async fn place_order(&self, session_id: &str) -> PaymentResult<Order> {
        let bound = self.binder.lookup(session_id).await?;

        let _guard = self.order_locks.lock(bound.id.as_str()).await;
        let order = self.orders.get_order(&bound.id).await?;
        let status = order
            .status
            .transition(OrderEvent::OrderPlaced)?
            .resolve(order.status);

        if status != order.status {
            self.orders.set_status(&order.id, status).await?;
            info!("Order {} placed: {} -> {}", order.id, order.status, status);
        }

        self.orders.get_order(&order.id).await
    }

    /// Provider callback. Never fails: every outcome is acknowledged.
    #[instrument(skip(self, payload, signature), fields(provider = self.gateway.provider_name(), bytes = payload.len()))]
    pub async fn handle_callback(&self, payload: &[u8], signature: Option<&str>) -> CallbackAck {
        let callback = match self.gateway.verify_callback(payload, signature).await {
            Ok(callback) => callback,
            Err(e @ PaymentError::WebhookVerificationFailed(_)) => {
                warn!("Rejected unauthenticated callback: {}", e);
                return CallbackAck::rejected("signature verification failed");
            }
            Err(e) => {
                warn!("Undecodable callback: {}", e);
                return CallbackAck::rejected("payload not understood");
            }
        };

        let outcome = self.reconciler.handle(callback).await;
        CallbackAck::from_outcome(&outcome)
    }

    /// Order snapshot, expiring it first if its window has elapsed
    pub async fn order_status(&self, order_id: &OrderId) -> PaymentResult<Order> {
        self.reconciler.expire_if_overdue(order_id, Utc::now()).await
    }

    /// Expire every pushed order whose confirmation window has elapsed
    #[instrument(skip(self))]
    pub async fn expire_stale_orders(&self) -> PaymentResult<Vec<OrderId>> {
        self.reconciler.expire_overdue(Utc::now()).await
    }
}
