//! # Push Initiator
//!
//! Sends the provider push for a bound order and, only when the provider
//! hands back a transaction id, records that id on the order.

use crate::error::{PaymentError, PaymentResult};
use crate::locks::KeyedLocks;
use crate::order::{Order, OrderEvent, OrderId, OrderStatus};
use crate::phone::Phone;
use crate::provider::{AccessToken, PushOutcome, PushRequest, SharedGateway};
use crate::store::OrderStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Longest slice of a rejected provider body kept in logs
const LOGGED_BODY_LIMIT: usize = 512;

/// Acknowledgement of a push the provider accepted for processing.
///
/// Acceptance is not payment: the outcome arrives later by callback.
#[derive(Debug, Clone, Serialize)]
pub struct PushAck {
    pub order_id: OrderId,
    pub reference: String,
    pub status: OrderStatus,
}

pub struct PushInitiator {
    gateway: SharedGateway,
    orders: Arc<dyn OrderStore>,
    order_locks: Arc<KeyedLocks>,
}

impl PushInitiator {
    pub fn new(gateway: SharedGateway, orders: Arc<dyn OrderStore>, order_locks: Arc<KeyedLocks>) -> Self {
        Self {
            gateway,
            orders,
            order_locks,
        }
    }

    /// Push a payment prompt for `order` to `phone`.
    ///
    /// On any failure the order is left exactly as it was.
    #[instrument(skip(self, order, phone, token), fields(order_id = %order.id, phone = %phone.masked()))]
    pub async fn initiate(&self, order: &Order, phone: &Phone, token: &AccessToken) -> PaymentResult<PushAck> {
        // Refuse before touching the network if the order is finished.
        order.status.transition(OrderEvent::PushAccepted)?;

        let amount = self.orders.get_total(&order.id).await?;
        if amount.is_zero() {
            warn!("Order {} has a zero total; pushing anyway", order.id);
        }

        let request = PushRequest {
            order_id: order.id.clone(),
            phone: phone.clone(),
            amount,
        };

        info!(
            "Sending {} push: amount={}",
            self.gateway.provider_name(),
            request.amount.display()
        );

        match self.gateway.send_push(&request, token).await? {
            PushOutcome::Accepted { reference } => self.record_acceptance(&order.id, reference).await,
            PushOutcome::Rejected { status, raw_body } => {
                error!(
                    "Push rejected: status={}, body={}",
                    status,
                    truncate(&raw_body, LOGGED_BODY_LIMIT)
                );
                Err(PaymentError::provider(
                    self.gateway.provider_name(),
                    format!("push not accepted (HTTP {})", status),
                ))
            }
        }
    }

    async fn record_acceptance(&self, order_id: &OrderId, reference: String) -> PaymentResult<PushAck> {
        let _guard = self.order_locks.lock(order_id.as_str()).await;

        // Re-read: a callback, checkout submit or expiry may have landed
        // while the push was in flight.
        let current = self.orders.get_order(order_id).await?;
        let status = match current.status.transition(OrderEvent::PushAccepted) {
            Ok(transition) => transition.resolve(current.status),
            Err(_) => {
                warn!(
                    "Order {} became {} during push; keeping status",
                    order_id, current.status
                );
                current.status
            }
        };

        self.orders
            .record_push(order_id, &reference, status, Utc::now())
            .await?;

        info!("Push accepted: reference={}, status={}", reference, status);

        Ok(PushAck {
            order_id: order_id.clone(),
            reference,
            status,
        })
    }
}

fn truncate(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
