//! # Payment Session Binder
//!
//! Maps a shopper's checkout session to exactly one order. The first push
//! for a session creates a draft; later pushes reuse it, so a double click
//! on "Pay Now" never produces two orders.

use crate::error::{PaymentError, PaymentResult};
use crate::locks::KeyedLocks;
use crate::order::{Order, OrderId, OrderStatus};
use crate::phone::Phone;
use crate::store::{OrderStore, SessionStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Session key holding the bound order id
pub const ORDER_KEY: &str = "order_id";

/// Session key holding the normalized phone captured at binding time
pub const PHONE_KEY: &str = "push_phone";

pub struct SessionBinder {
    sessions: Arc<dyn SessionStore>,
    orders: Arc<dyn OrderStore>,
    locks: KeyedLocks,
}

impl SessionBinder {
    pub fn new(sessions: Arc<dyn SessionStore>, orders: Arc<dyn OrderStore>) -> Self {
        Self {
            sessions,
            orders,
            locks: KeyedLocks::new(),
        }
    }

    /// Return the session's order, creating and binding a draft on first use.
    ///
    /// A bound order that ended `failed` or `expired` is replaced by a fresh
    /// draft. A bound id missing from the order store is `OrderNotFound`.
    #[instrument(skip(self, phone), fields(phone = %phone.masked()))]
    pub async fn bind(&self, session_id: &str, phone: &Phone) -> PaymentResult<Order> {
        let _guard = self.locks.lock(session_id).await;

        if let Some(bound) = self.sessions.get(session_id, ORDER_KEY).await? {
            let order = self.orders.get_order(&OrderId::new(bound)).await?;
            if !matches!(order.status, OrderStatus::Failed | OrderStatus::Expired) {
                debug!("Reusing order {} ({})", order.id, order.status);
                return Ok(order);
            }

            info!(
                "Session order {} ended {}, binding a fresh draft",
                order.id, order.status
            );
            let order = self.create_draft().await?;
            self.sessions
                .set(session_id, ORDER_KEY, order.id.to_string())
                .await?;
            self.sessions
                .set(session_id, PHONE_KEY, phone.to_string())
                .await?;
            return Ok(order);
        }

        let order = self.create_draft().await?;
        let stored = self
            .sessions
            .set_if_absent(session_id, ORDER_KEY, order.id.to_string())
            .await?;

        if stored != order.id.as_str() {
            // Session written by another process between get and set.
            warn!(
                "Session bound to order {} concurrently; draft {} left unused",
                stored, order.id
            );
            return self.orders.get_order(&OrderId::new(stored)).await;
        }

        self.sessions
            .set_if_absent(session_id, PHONE_KEY, phone.to_string())
            .await?;

        info!("Bound session to new draft order {}", order.id);
        Ok(order)
    }

    /// The order bound to a session; `SessionNotFound` if none
    pub async fn lookup(&self, session_id: &str) -> PaymentResult<Order> {
        let bound = self
            .sessions
            .get(session_id, ORDER_KEY)
            .await?
            .ok_or_else(|| PaymentError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        self.orders.get_order(&OrderId::new(bound)).await
    }

    async fn create_draft(&self) -> PaymentResult<Order> {
        let id = self.orders.create_draft_order().await?;
        self.orders.get_order(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phone::normalize;
    use crate::store::{InMemoryOrderStore, InMemorySessionStore};

    fn binder() -> (SessionBinder, InMemoryOrderStore, InMemorySessionStore) {
        let orders = InMemoryOrderStore::new();
        let sessions = InMemorySessionStore::new();
        let binder = SessionBinder::new(Arc::new(sessions.clone()), Arc::new(orders.clone()));
        (binder, orders, sessions)
    }

    #[tokio::test]
    async fn test_bind_is_idempotent() {
        let (binder, orders, sessions) = binder();
        let phone = normalize("0722000111").unwrap();

        let first = binder.bind("S1", &phone).await.unwrap();
        let second = binder.bind("S1", &phone).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, OrderStatus::Draft);
        assert_eq!(orders.len().await, 1);
        assert_eq!(
            sessions.get("S1", PHONE_KEY).await.unwrap().as_deref(),
            Some("254722000111")
        );
    }

    #[tokio::test]
    async fn test_sessions_get_distinct_orders() {
        let (binder, orders, _) = binder();
        let phone = normalize("0722000111").unwrap();

        let a = binder.bind("S1", &phone).await.unwrap();
        let b = binder.bind("S2", &phone).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(orders.len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_binds_create_one_draft() {
        let (binder, orders, _) = binder();
        let binder = Arc::new(binder);
        let phone = normalize("0722000111").unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let binder = binder.clone();
            let phone = phone.clone();
            handles.push(tokio::spawn(async move { binder.bind("S1", &phone).await }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(orders.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_order_is_replaced() {
        let (binder, orders, _) = binder();
        let phone = normalize("0722000111").unwrap();

        let first = binder.bind("S1", &phone).await.unwrap();
        orders.set_status(&first.id, OrderStatus::Failed).await.unwrap();

        let second = binder.bind("S1", &phone).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, OrderStatus::Draft);
        assert_eq!(binder.lookup("S1").await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_confirmed_order_is_kept() {
        let (binder, orders, _) = binder();
        let phone = normalize("0722000111").unwrap();

        let first = binder.bind("S1", &phone).await.unwrap();
        orders.set_status(&first.id, OrderStatus::Confirmed).await.unwrap();

        let second = binder.bind("S1", &phone).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_lookup_without_binding() {
        let (binder, _, _) = binder();
        assert!(matches!(
            binder.lookup("nobody").await,
            Err(PaymentError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dangling_binding_is_not_found() {
        let (binder, _, sessions) = binder();
        sessions.set("S1", ORDER_KEY, "gone".into()).await.unwrap();

        let phone = normalize("0722000111").unwrap();
        assert!(matches!(
            binder.bind("S1", &phone).await,
            Err(PaymentError::OrderNotFound(_))
        ));
    }

    /// Hides the bound order from `get`, as if another process bound the
    /// session right after the lookup
    struct LateBinding {
        inner: InMemorySessionStore,
    }

    #[async_trait::async_trait]
    impl SessionStore for LateBinding {
        async fn get(&self, session_id: &str, key: &str) -> PaymentResult<Option<String>> {
            match key {
                ORDER_KEY => Ok(None),
                _ => self.inner.get(session_id, key).await,
            }
        }

        async fn set(&self, session_id: &str, key: &str, value: String) -> PaymentResult<()> {
            self.inner.set(session_id, key, value).await
        }

        async fn set_if_absent(&self, session_id: &str, key: &str, value: String) -> PaymentResult<String> {
            self.inner.set_if_absent(session_id, key, value).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_binding_returns_stored_order() {
        let orders = InMemoryOrderStore::new();
        let sessions = InMemorySessionStore::new();
        let existing = orders.create_draft_order().await.unwrap();
        sessions
            .set("S1", ORDER_KEY, existing.to_string())
            .await
            .unwrap();

        let binder = SessionBinder::new(
            Arc::new(LateBinding { inner: sessions.clone() }),
            Arc::new(orders.clone()),
        );
        let phone = normalize("0722000111").unwrap();

        let order = binder.bind("S1", &phone).await.unwrap();
        assert_eq!(order.id, existing);
        assert_eq!(
            sessions.get("S1", ORDER_KEY).await.unwrap().as_deref(),
            Some(existing.as_str())
        );
    }
}
