//! # Order Types
//!
//! The order record a push payment is anchored to, and the state machine
//! that is the authoritative status of one checkout attempt.
//!
//! ```text
//!  draft ──┐
//!          ├─ push accepted ─▶ push_sent ─ order placed ─▶ on_hold
//!  awaiting_push ─┘                 │                         │
//!                                   └──────────┬──────────────┘
//!                      callback success / failure / timeout
//!                                   ▼
//!                     confirmed | failed | expired   (terminal)
//! ```

use crate::error::{PaymentError, PaymentResult};
use crate::money::Price;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order identifier issued by the order store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a checkout attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by the session binder, no push accepted yet
    Draft,
    /// Created by the storefront's normal checkout, no push accepted yet
    AwaitingPush,
    /// Provider accepted a push; waiting for the shopper to approve
    PushSent,
    /// Order placed at checkout, payment not yet externally confirmed
    OnHold,
    /// Provider confirmed payment
    Confirmed,
    /// Provider reported failure
    Failed,
    /// No callback arrived within the confirmation window
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::AwaitingPush => "awaiting_push",
            OrderStatus::PushSent => "push_sent",
            OrderStatus::OnHold => "on_hold",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Failed | OrderStatus::Expired
        )
    }

    /// A push was accepted and the outcome is still outstanding
    pub fn is_awaiting_confirmation(&self) -> bool {
        matches!(self, OrderStatus::PushSent | OrderStatus::OnHold)
    }

    /// Apply an event to this status.
    ///
    /// `Ok(Transition::Unchanged)` is a legal no-op (duplicate callback,
    /// re-push, event against a terminal order). `Err(InvalidTransition)`
    /// means the caller must not proceed.
    pub fn transition(self, event: OrderEvent) -> PaymentResult<Transition> {
        use OrderEvent::*;
        use OrderStatus::*;

        let next = match (self, event) {
            (Draft | AwaitingPush, PushAccepted) => Transition::To(PushSent),
            (PushSent | OnHold, PushAccepted) => Transition::Unchanged,

            (PushSent | AwaitingPush, OrderPlaced) => Transition::To(OnHold),
            (OnHold | Confirmed, OrderPlaced) => Transition::Unchanged,

            (PushSent | OnHold, PaymentConfirmed) => Transition::To(Confirmed),
            (PushSent | OnHold, PaymentFailed) => Transition::To(Failed),
            (PushSent | OnHold, ConfirmationTimedOut) => Transition::To(Expired),

            (Draft | AwaitingPush, PaymentConfirmed | PaymentFailed | ConfirmationTimedOut) => {
                Transition::Unchanged
            }
            (Confirmed | Failed | Expired, PaymentConfirmed | PaymentFailed | ConfirmationTimedOut) => {
                Transition::Unchanged
            }

            (Confirmed | Failed | Expired, PushAccepted) | (Draft | Failed | Expired, OrderPlaced) => {
                return Err(PaymentError::InvalidTransition { from: self, event })
            }
        };

        Ok(next)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    /// Provider accepted a push request
    PushAccepted,
    /// Shopper submitted "place order" at checkout
    OrderPlaced,
    /// Callback reported success
    PaymentConfirmed,
    /// Callback reported failure
    PaymentFailed,
    /// Confirmation window elapsed without a callback
    ConfirmationTimedOut,
}

impl OrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::PushAccepted => "push_accepted",
            OrderEvent::OrderPlaced => "order_placed",
            OrderEvent::PaymentConfirmed => "payment_confirmed",
            OrderEvent::PaymentFailed => "payment_failed",
            OrderEvent::ConfirmationTimedOut => "confirmation_timed_out",
        }
    }
}

impl std::fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status moves to the given value
    To(OrderStatus),
    /// Status stays as it is
    Unchanged,
}

impl Transition {
    /// The status after the transition, given the status before it
    pub fn resolve(self, current: OrderStatus) -> OrderStatus {
        match self {
            Transition::To(next) => next,
            Transition::Unchanged => current,
        }
    }
}

/// An order a push payment is anchored to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Order id from the order store
    pub id: OrderId,

    /// Order total (read from the store, never computed here)
    pub total: Price,

    /// Current status
    pub status: OrderStatus,

    /// Reference of the most recent accepted push
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,

    /// When the most recent push was accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_sent_at: Option<DateTime<Utc>>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last status or reference change
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a draft order
    pub fn draft(id: OrderId, total: Price) -> Self {
        let now = Utc::now();
        Self {
            id,
            total,
            status: OrderStatus::Draft,
            transaction_reference: None,
            push_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an order that reached checkout through the storefront
    pub fn awaiting_push(id: OrderId, total: Price) -> Self {
        Self {
            status: OrderStatus::AwaitingPush,
            ..Self::draft(id, total)
        }
    }

    /// True when the outcome is outstanding and the last push is older
    /// than `window` at `now`. An order placed on hold without a push is
    /// measured from its last status change.
    pub fn confirmation_overdue(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let since = self.push_sent_at.unwrap_or(self.updated_at);
        self.status.is_awaiting_confirmation() && now - since >= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    #[test]
    fn test_happy_path() {
        let s = OrderStatus::Draft;
        let s = s.transition(OrderEvent::PushAccepted).unwrap().resolve(s);
        assert_eq!(s, OrderStatus::PushSent);
        let s = s.transition(OrderEvent::OrderPlaced).unwrap().resolve(s);
        assert_eq!(s, OrderStatus::OnHold);
        let s = s.transition(OrderEvent::PaymentConfirmed).unwrap().resolve(s);
        assert_eq!(s, OrderStatus::Confirmed);
    }

    #[test]
    fn test_callback_outcomes_from_push_sent_and_on_hold() {
        for from in [OrderStatus::PushSent, OrderStatus::OnHold] {
            assert_eq!(
                from.transition(OrderEvent::PaymentConfirmed).unwrap(),
                Transition::To(OrderStatus::Confirmed)
            );
            assert_eq!(
                from.transition(OrderEvent::PaymentFailed).unwrap(),
                Transition::To(OrderStatus::Failed)
            );
            assert_eq!(
                from.transition(OrderEvent::ConfirmationTimedOut).unwrap(),
                Transition::To(OrderStatus::Expired)
            );
        }
    }

    #[test]
    fn test_terminal_states_ignore_callbacks() {
        for from in [OrderStatus::Confirmed, OrderStatus::Failed, OrderStatus::Expired] {
            assert!(from.is_terminal());
            for event in [
                OrderEvent::PaymentConfirmed,
                OrderEvent::PaymentFailed,
                OrderEvent::ConfirmationTimedOut,
            ] {
                assert_eq!(from.transition(event).unwrap(), Transition::Unchanged);
            }
            assert!(matches!(
                from.transition(OrderEvent::PushAccepted),
                Err(PaymentError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_repush_keeps_status() {
        assert_eq!(
            OrderStatus::PushSent.transition(OrderEvent::PushAccepted).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            OrderStatus::OnHold.transition(OrderEvent::PushAccepted).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_place_order_requires_push() {
        assert!(OrderStatus::Draft.transition(OrderEvent::OrderPlaced).is_err());
        assert!(OrderStatus::Failed.transition(OrderEvent::OrderPlaced).is_err());
        assert_eq!(
            OrderStatus::Confirmed.transition(OrderEvent::OrderPlaced).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            OrderStatus::AwaitingPush.transition(OrderEvent::OrderPlaced).unwrap(),
            Transition::To(OrderStatus::OnHold)
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PushSent).unwrap();
        assert_eq!(json, "\"push_sent\"");
        assert_eq!(OrderStatus::AwaitingPush.to_string(), "awaiting_push");
    }

    #[test]
    fn test_confirmation_overdue() {
        let mut order = Order::draft(OrderId::new("o1"), Price::zero(Currency::kes()));
        let now = Utc::now();
        assert!(!order.confirmation_overdue(now, Duration::minutes(15)));

        order.status = OrderStatus::PushSent;
        order.push_sent_at = Some(now - Duration::minutes(20));
        assert!(order.confirmation_overdue(now, Duration::minutes(15)));
        assert!(!order.confirmation_overdue(now, Duration::minutes(30)));

        order.status = OrderStatus::Confirmed;
        assert!(!order.confirmation_overdue(now, Duration::minutes(15)));
    }

    #[test]
    fn test_on_hold_without_push_still_expires() {
        let mut order = Order::awaiting_push(OrderId::new("o2"), Price::zero(Currency::kes()));
        let now = Utc::now();
        order.status = order
            .status
            .transition(OrderEvent::OrderPlaced)
            .unwrap()
            .resolve(order.status);
        order.updated_at = now - Duration::minutes(20);

        assert_eq!(order.status, OrderStatus::OnHold);
        assert!(order.push_sent_at.is_none());
        assert!(order.confirmation_overdue(now, Duration::minutes(15)));
        assert!(!order.confirmation_overdue(now, Duration::minutes(30)));
    }
}
