//! Repository ports used by the fulfillment core.
//!
//! Every method takes `&mut self`: a repository handle is a view onto one
//! open connection or transaction, never a shared pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OutboxEventId, PaymentId};
use domain::{Order, OrderState, OutboxEvent, Payment, Product, ProductId};

use crate::Result;

#[async_trait]
pub trait OrderRepository: Send {
    async fn find_by_id(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Inserts or replaces the order.
    async fn save(&mut self, order: &Order) -> Result<()>;

    /// Orders in `state` whose last update happened before `updated_before`,
    /// oldest first.
    async fn find_by_state(
        &mut self,
        state: OrderState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait PaymentRepository: Send {
    async fn find_by_id(&mut self, id: PaymentId) -> Result<Option<Payment>>;

    async fn find_by_external_id(&mut self, external_id: &str) -> Result<Option<Payment>>;

    /// The single `PENDING` payment of an order, if any.
    async fn find_pending_by_order(&mut self, order_id: OrderId) -> Result<Option<Payment>>;

    /// `PENDING` payments created before `created_before`, oldest first.
    async fn find_pending_created_before(
        &mut self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>>;

    /// Inserts or replaces the payment.
    async fn save(&mut self, payment: &Payment) -> Result<()>;
}

/// Read access to the catalog plus the stock counter.
#[async_trait]
pub trait ProductRepository: Send {
    async fn find_by_id(&mut self, id: &ProductId) -> Result<Option<Product>>;

    /// Reads the product and locks its row until the transaction ends.
    async fn find_for_update(&mut self, id: &ProductId) -> Result<Option<Product>>;

    /// Takes `quantity` units out of stock.
    ///
    /// Fails with [`crate::StoreError::InsufficientStock`] instead of going
    /// below zero.
    async fn decrement_stock(&mut self, id: &ProductId, quantity: u32) -> Result<()>;
}

#[async_trait]
pub trait OutboxRepository: Send {
    async fn find_by_id(&mut self, id: OutboxEventId) -> Result<Option<OutboxEvent>>;

    /// Inserts or replaces the event.
    async fn save(&mut self, event: &OutboxEvent) -> Result<()>;

    /// Events that are neither processed nor failed and have fewer than
    /// `retry_budget` retries, oldest first, at most `limit`.
    async fn find_pending(&mut self, retry_budget: u32, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Events that are neither processed nor failed but already have
    /// `retry_budget` or more retries, oldest first, at most `limit`.
    async fn find_exhausted(&mut self, retry_budget: u32, limit: usize)
    -> Result<Vec<OutboxEvent>>;
}
