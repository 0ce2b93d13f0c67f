//! # Callback Reconciler
//!
//! Applies provider callbacks to orders. Correlation uses only the
//! transaction reference recorded at push time; the callback carries no
//! session and its other fields are never trusted.
//!
//! Nothing here returns an error to the provider. Every outcome is logged
//! and acknowledged once; duplicates are no-ops.
//!
//! A callback can beat the push response home. Such a callback is parked,
//! and replayed when the initiator records its reference.

use crate::error::PaymentResult;
use crate::locks::KeyedLocks;
use crate::order::{Order, OrderEvent, OrderId, OrderStatus, Transition};
use crate::provider::{CallbackOutcome, ProviderCallback};
use crate::store::OrderStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, instrument, warn};

/// Default number of early callbacks held for replay
pub const DEFAULT_PARKED_CAPACITY: usize = 1024;

/// What a callback did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Order moved to `status`
    Applied { order_id: OrderId, status: OrderStatus },
    /// Order already past this point; nothing changed
    Duplicate { order_id: OrderId, status: OrderStatus },
    /// Reference unknown yet; held for replay
    Parked { reference: String },
    /// Reference unknown and not held
    Unmatched { reference: String },
    /// Callback not actionable (intermediate status, store failure)
    Ignored { reason: String },
}

impl ReconcileOutcome {
    pub fn describe(&self) -> String {
        match self {
            ReconcileOutcome::Applied { order_id, status } => {
                format!("order {} is now {}", order_id, status)
            }
            ReconcileOutcome::Duplicate { order_id, status } => {
                format!("order {} already {}", order_id, status)
            }
            ReconcileOutcome::Parked { .. } => "reference not yet known; held".to_string(),
            ReconcileOutcome::Unmatched { .. } => "no matching order".to_string(),
            ReconcileOutcome::Ignored { reason } => reason.clone(),
        }
    }
}

struct ParkedCallback {
    callback: ProviderCallback,
    received_at: DateTime<Utc>,
}

pub struct CallbackReconciler {
    orders: Arc<dyn OrderStore>,
    order_locks: Arc<KeyedLocks>,
    parked: Mutex<VecDeque<ParkedCallback>>,
    parked_capacity: usize,
    confirmation_window: Duration,
}

impl CallbackReconciler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        order_locks: Arc<KeyedLocks>,
        confirmation_window: Duration,
    ) -> Self {
        Self {
            orders,
            order_locks,
            parked: Mutex::new(VecDeque::new()),
            parked_capacity: DEFAULT_PARKED_CAPACITY,
            confirmation_window,
        }
    }

    /// Builder: how many early callbacks to hold
    pub fn with_parked_capacity(mut self, capacity: usize) -> Self {
        self.parked_capacity = capacity;
        self
    }

    pub fn confirmation_window(&self) -> Duration {
        self.confirmation_window
    }

    /// Apply one provider callback.
    #[instrument(skip(self, callback), fields(reference = %callback.reference, outcome = ?callback.outcome))]
    pub async fn handle(&self, callback: ProviderCallback) -> ReconcileOutcome {
        let event = match &callback.outcome {
            CallbackOutcome::Other(status) => {
                info!("Callback with non-final status {:?}; nothing to do", status);
                return ReconcileOutcome::Ignored {
                    reason: format!("non-final status {}", status),
                };
            }
            CallbackOutcome::Success => OrderEvent::PaymentConfirmed,
            CallbackOutcome::Failure => OrderEvent::PaymentFailed,
        };

        let order = match self.orders.find_by_reference(&callback.reference).await {
            Ok(Some(order)) => order,
            Ok(None) => return self.park_and_recheck(callback, event).await,
            Err(e) => {
                error!("Order lookup failed: {}", e);
                return ReconcileOutcome::Ignored {
                    reason: "order lookup failed".to_string(),
                };
            }
        };

        self.apply_logged(&order.id, event).await
    }

    /// Replay a parked callback for a reference that was just recorded
    pub async fn replay_parked(&self, reference: &str) -> Option<ReconcileOutcome> {
        let parked = self.take_parked(reference)?;
        info!("Replaying early callback for {}", reference);
        Some(self.handle(parked.callback).await)
    }

    pub fn parked_len(&self) -> usize {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Expire a single order if its confirmation window has elapsed.
    /// Returns the order as it stands afterwards.
    pub async fn expire_if_overdue(&self, order_id: &OrderId, now: DateTime<Utc>) -> PaymentResult<Order> {
        let _guard = self.order_locks.lock(order_id.as_str()).await;
        let order = self.orders.get_order(order_id).await?;

        if !order.confirmation_overdue(now, self.confirmation_window) {
            return Ok(order);
        }

        let status = order
            .status
            .transition(OrderEvent::ConfirmationTimedOut)?
            .resolve(order.status);
        self.orders.set_status(order_id, status).await?;
        warn!("Order {} expired without a callback", order_id);

        self.orders.get_order(order_id).await
    }

    /// Expire every order whose confirmation window has elapsed
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> PaymentResult<Vec<OrderId>> {
        let candidates = self
            .orders
            .orders_with_status(&[OrderStatus::PushSent, OrderStatus::OnHold])
            .await?;

        let mut expired = Vec::new();
        for order in candidates
            .into_iter()
            .filter(|o| o.confirmation_overdue(now, self.confirmation_window))
        {
            if self.expire_if_overdue(&order.id, now).await?.status == OrderStatus::Expired {
                expired.push(order.id);
            }
        }

        if !expired.is_empty() {
            info!("Expired {} order(s)", expired.len());
        }
        Ok(expired)
    }

    async fn apply_logged(&self, order_id: &OrderId, event: OrderEvent) -> ReconcileOutcome {
        match self.apply(order_id, event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to apply {} to order {}: {}", event, order_id, e);
                ReconcileOutcome::Ignored {
                    reason: "order update failed".to_string(),
                }
            }
        }
    }

    /// Park an unmatched callback, then look the reference up again. A push
    /// may record its reference and replay an empty buffer between the first
    /// lookup and the park; whoever removes the parked entry applies it.
    async fn park_and_recheck(&self, callback: ProviderCallback, event: OrderEvent) -> ReconcileOutcome {
        let outcome = self.park(callback);
        let reference = match &outcome {
            ReconcileOutcome::Parked { reference } | ReconcileOutcome::Unmatched { reference } => {
                reference.clone()
            }
            _ => return outcome,
        };

        let order = match self.orders.find_by_reference(&reference).await {
            Ok(Some(order)) => order,
            _ => return outcome,
        };

        let event = match &outcome {
            ReconcileOutcome::Parked { .. } => match self.take_parked(&reference) {
                Some(parked) => final_event(&parked.callback.outcome).unwrap_or(event),
                // Replay already claimed it
                None => return outcome,
            },
            _ => event,
        };

        info!("Reference {} was recorded while parking; applying now", reference);
        self.apply_logged(&order.id, event).await
    }

    fn take_parked(&self, reference: &str) -> Option<ParkedCallback> {
        let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        let index = parked.iter().position(|p| p.callback.reference == reference)?;
        parked.remove(index)
    }

    async fn apply(&self, order_id: &OrderId, event: OrderEvent) -> PaymentResult<ReconcileOutcome> {
        let _guard = self.order_locks.lock(order_id.as_str()).await;
        let order = self.orders.get_order(order_id).await?;

        match order.status.transition(event)? {
            Transition::To(status) => {
                self.orders.set_status(order_id, status).await?;
                info!("Order {} {} -> {}", order_id, order.status, status);
                Ok(ReconcileOutcome::Applied {
                    order_id: order_id.clone(),
                    status,
                })
            }
            Transition::Unchanged => {
                info!("Order {} already {}; {} is a no-op", order_id, order.status, event);
                Ok(ReconcileOutcome::Duplicate {
                    order_id: order_id.clone(),
                    status: order.status,
                })
            }
        }
    }

    fn park(&self, callback: ProviderCallback) -> ReconcileOutcome {
        warn!("No order matches callback reference {}", callback.reference);

        if self.parked_capacity == 0 {
            return ReconcileOutcome::Unmatched {
                reference: callback.reference,
            };
        }

        let now = Utc::now();
        let reference = callback.reference.clone();
        let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);

        parked.retain(|p| now - p.received_at < self.confirmation_window);
        if parked.iter().any(|p| p.callback.reference == reference) {
            return ReconcileOutcome::Parked { reference };
        }
        while parked.len() >= self.parked_capacity {
            parked.pop_front();
        }
        parked.push_back(ParkedCallback {
            callback,
            received_at: now,
        });

        ReconcileOutcome::Parked { reference }
    }
}

fn final_event(outcome: &CallbackOutcome) -> Option<OrderEvent> {
    match outcome {
        CallbackOutcome::Success => Some(OrderEvent::PaymentConfirmed),
        CallbackOutcome::Failure => Some(OrderEvent::PaymentFailed),
        CallbackOutcome::Other(_) => None,
    }
}
