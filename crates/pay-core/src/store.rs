//! # Order and Session Stores
//!
//! The storefront's order persistence and session scratch storage, seen
//! from the engine as injected collaborators. In-memory implementations
//! back the binary and the tests.

use crate::error::{PaymentError, PaymentResult};
use crate::money::{Currency, Price};
use crate::order::{Order, OrderId, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Order persistence owned by the storefront
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Create an empty draft order and return its id
    async fn create_draft_order(&self) -> PaymentResult<OrderId>;

    /// Fetch an order; `OrderNotFound` if absent
    async fn get_order(&self, id: &OrderId) -> PaymentResult<Order>;

    async fn set_status(&self, id: &OrderId, status: OrderStatus) -> PaymentResult<()>;

    /// Current order total (computed by the storefront)
    async fn get_total(&self, id: &OrderId) -> PaymentResult<Price>;

    /// Record an accepted push: store `reference` as the current one, index
    /// it for callback lookup, and set `status`.
    async fn record_push(
        &self,
        id: &OrderId,
        reference: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> PaymentResult<()>;

    /// Find the order any accepted push `reference` belongs to
    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<Order>>;

    async fn orders_with_status(&self, statuses: &[OrderStatus]) -> PaymentResult<Vec<Order>>;
}

/// Per-session key/value scratch storage owned by the storefront
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> PaymentResult<Option<String>>;

    async fn set(&self, session_id: &str, key: &str, value: String) -> PaymentResult<()>;

    /// Store `value` only if `key` is unset; returns the value now stored.
    async fn set_if_absent(&self, session_id: &str, key: &str, value: String) -> PaymentResult<String>;
}

#[derive(Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    references: HashMap<String, OrderId>,
}

/// A thread-safe in-memory order store.
///
/// Every reference an order was ever pushed with stays indexed, so a late
/// callback for an earlier push still finds its order.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
    draft_total: Price,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderStore {
    /// Drafts start at zero KES
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(OrderTable::default())),
            draft_total: Price::zero(Currency::kes()),
        }
    }

    /// Builder: total given to newly created drafts
    pub fn with_draft_total(mut self, total: Price) -> Self {
        self.draft_total = total;
        self
    }

    /// Insert an order created elsewhere (storefront checkout)
    pub async fn insert(&self, order: Order) {
        let mut table = self.table.write().await;
        if let Some(reference) = &order.transaction_reference {
            table.references.insert(reference.clone(), order.id.clone());
        }
        table.orders.insert(order.id.clone(), order);
    }

    /// Storefront-side total update (cart changed)
    pub async fn set_total(&self, id: &OrderId, total: Price) -> PaymentResult<()> {
        let mut table = self.table.write().await;
        let order = table
            .orders
            .get_mut(id)
            .ok_or_else(|| PaymentError::OrderNotFound(id.to_string()))?;
        order.total = total;
        order.updated_at = Utc::now();
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_draft_order(&self) -> PaymentResult<OrderId> {
        let order = Order::draft(OrderId::generate(), self.draft_total.clone());
        let id = order.id.clone();
        self.table.write().await.orders.insert(id.clone(), order);
        Ok(id)
    }

    async fn get_order(&self, id: &OrderId) -> PaymentResult<Order> {
        self.table
            .read()
            .await
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::OrderNotFound(id.to_string()))
    }

    async fn set_status(&self, id: &OrderId, status: OrderStatus) -> PaymentResult<()> {
        let mut table = self.table.write().await;
        let order = table
            .orders
            .get_mut(id)
            .ok_or_else(|| PaymentError::OrderNotFound(id.to_string()))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn get_total(&self, id: &OrderId) -> PaymentResult<Price> {
        self.get_order(id).await.map(|order| order.total)
    }

    async fn record_push(
        &self,
        id: &OrderId,
        reference: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> PaymentResult<()> {
        let mut table = self.table.write().await;
        let order = table
            .orders
            .get_mut(id)
            .ok_or_else(|| PaymentError::OrderNotFound(id.to_string()))?;
        order.transaction_reference = Some(reference.to_string());
        order.push_sent_at = Some(at);
        order.status = status;
        order.updated_at = at;
        table.references.insert(reference.to_string(), id.clone());
        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<Order>> {
        let table = self.table.read().await;
        Ok(table
            .references
            .get(reference)
            .and_then(|id| table.orders.get(id))
            .cloned())
    }

    async fn orders_with_status(&self, statuses: &[OrderStatus]) -> PaymentResult<Vec<Order>> {
        let table = self.table.read().await;
        Ok(table
            .orders
            .values()
            .filter(|order| statuses.contains(&order.status))
            .cloned()
            .collect())
    }
}

/// A thread-safe in-memory session store
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> PaymentResult<Option<String>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).and_then(|s| s.get(key)).cloned())
    }

    async fn set(&self, session_id: &str, key: &str, value: String) -> PaymentResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, session_id: &str, key: &str, value: String) -> PaymentResult<String> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .entry(session_id.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(value);
        Ok(stored.clone())
    }
}
