use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OutboxEventId, PaymentId};
use domain::{Order, OrderRecord, OrderState, OutboxEvent, Payment, Product, ProductId};
use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use crate::repository::{OrderRepository, OutboxRepository, PaymentRepository, ProductRepository};
use crate::store::{Store, UnitOfWork};
use crate::{Result, StoreError};

/// Everything the in-memory store holds.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub orders: HashMap<OrderId, OrderRecord>,
    pub payments: HashMap<PaymentId, Payment>,
    pub products: HashMap<ProductId, Product>,
    pub outbox: HashMap<OutboxEventId, OutboxEvent>,
}

type Hook = Box<dyn FnOnce(&mut MemoryState) + Send>;

/// In-memory store for tests and local runs.
///
/// A unit of work holds the store-wide lock for its whole duration and works
/// on a private copy of the state that replaces the shared state on commit.
/// Transactions therefore execute one at a time, which is trivially
/// serializable.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    writes: Arc<AtomicUsize>,
    before_next_unit: Arc<StdMutex<Option<Hook>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog product.
    pub async fn insert_product(&self, product: Product) {
        self.state
            .lock()
            .await
            .products
            .insert(product.id.clone(), product);
    }

    /// Stores an order directly, bypassing any unit of work.
    pub async fn put_order(&self, order: &Order) {
        self.state
            .lock()
            .await
            .orders
            .insert(order.id(), OrderRecord::from(order));
    }

    /// Stores a payment directly, bypassing any unit of work.
    pub async fn put_payment(&self, payment: Payment) {
        self.state
            .lock()
            .await
            .payments
            .insert(payment.id, payment);
    }

    /// Stores an outbox event directly, bypassing any unit of work.
    pub async fn put_outbox_event(&self, event: OutboxEvent) {
        self.state.lock().await.outbox.insert(event.id, event);
    }

    pub async fn product(&self, id: &ProductId) -> Option<Product> {
        self.state.lock().await.products.get(id).cloned()
    }

    pub async fn order(&self, id: OrderId) -> Option<Order> {
        let record = self.state.lock().await.orders.get(&id).cloned()?;
        Order::try_from(record).ok()
    }

    pub async fn payment(&self, id: PaymentId) -> Option<Payment> {
        self.state.lock().await.payments.get(&id).cloned()
    }

    /// All payments ever made for an order, oldest first.
    pub async fn payments_for_order(&self, order_id: OrderId) -> Vec<Payment> {
        let state = self.state.lock().await;
        let mut payments: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }

    pub async fn outbox_event(&self, id: OutboxEventId) -> Option<OutboxEvent> {
        self.state.lock().await.outbox.get(&id).cloned()
    }

    /// All outbox events, oldest first.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state.outbox.values().cloned().collect();
        events.sort_by_key(|e| e.created_at);
        events
    }

    /// Number of repository writes issued through units of work so far,
    /// committed or not.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Registers a hook that mutates the committed state right before the
    /// next unit of work starts.
    ///
    /// Simulates another actor committing between a caller's pre-check and
    /// its transaction. The hook runs once.
    pub fn before_next_unit<H>(&self, hook: H)
    where
        H: FnOnce(&mut MemoryState) + Send + 'static,
    {
        if let Ok(mut slot) = self.before_next_unit.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    async fn run<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, std::result::Result<T, E>>,
    {
        let mut shared = self.state.lock().await;

        let hook = self
            .before_next_unit
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook(&mut shared);
        }

        let mut uow = MemoryUnitOfWork {
            state: shared.clone(),
            writes: 0,
        };
        let result = work(&mut uow).await;
        self.writes.fetch_add(uow.writes, Ordering::SeqCst);

        if result.is_ok() {
            *shared = uow.state;
        }
        result
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, std::result::Result<T, E>>
            + Send
            + 'static,
    {
        self.run(work).await
    }

    async fn query<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, std::result::Result<T, E>>
            + Send
            + 'static,
    {
        self.run(work).await
    }
}

struct MemoryUnitOfWork {
    state: MemoryState,
    writes: usize,
}

impl UnitOfWork for MemoryUnitOfWork {
    fn orders(&mut self) -> &mut dyn OrderRepository {
        self
    }

    fn payments(&mut self) -> &mut dyn PaymentRepository {
        self
    }

    fn products(&mut self) -> &mut dyn ProductRepository {
        self
    }

    fn outbox(&mut self) -> &mut dyn OutboxRepository {
        self
    }
}

fn restore_order(record: OrderRecord) -> Result<Order> {
    let id = record.id;
    Order::try_from(record).map_err(|e| StoreError::corrupt("order", id, e))
}

#[async_trait]
impl OrderRepository for MemoryUnitOfWork {
    async fn find_by_id(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.state
            .orders
            .get(&id)
            .cloned()
            .map(restore_order)
            .transpose()
    }

    async fn save(&mut self, order: &Order) -> Result<()> {
        self.writes += 1;
        self.state
            .orders
            .insert(order.id(), OrderRecord::from(order));
        Ok(())
    }

    async fn find_by_state(
        &mut self,
        state: OrderState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let mut records: Vec<_> = self
            .state
            .orders
            .values()
            .filter(|r| r.state == state && r.updated_at < updated_before)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        records.into_iter().map(restore_order).collect()
    }
}

#[async_trait]
impl PaymentRepository for MemoryUnitOfWork {
    async fn find_by_id(&mut self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.payments.get(&id).cloned())
    }

    async fn find_by_external_id(&mut self, external_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .payments
            .values()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_pending_by_order(&mut self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .state
            .payments
            .values()
            .find(|p| p.order_id == order_id && p.is_pending())
            .cloned())
    }

    async fn find_pending_created_before(
        &mut self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let mut payments: Vec<_> = self
            .state
            .payments
            .values()
            .filter(|p| p.is_pending() && p.created_at < created_before)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn save(&mut self, payment: &Payment) -> Result<()> {
        self.writes += 1;
        // Same guard as the partial unique index in PostgreSQL.
        let other_pending = self
            .state
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id && p.is_pending() && p.id != payment.id);
        if payment.is_pending() && other_pending {
            return Err(StoreError::Conflict(format!(
                "order {} already has a pending payment",
                payment.order_id
            )));
        }
        self.state.payments.insert(payment.id, payment.clone());
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for MemoryUnitOfWork {
    async fn find_by_id(&mut self, id: &ProductId) -> Result<Option<Product>> {
        Ok(self.state.products.get(id).cloned())
    }

    async fn find_for_update(&mut self, id: &ProductId) -> Result<Option<Product>> {
        // The store-wide lock is already held for the whole unit of work.
        Ok(self.state.products.get(id).cloned())
    }

    async fn decrement_stock(&mut self, id: &ProductId, quantity: u32) -> Result<()> {
        self.writes += 1;
        let product = self
            .state
            .products
            .get_mut(id)
            .ok_or_else(|| StoreError::corrupt("product", id, "missing on decrement"))?;
        if product.available < quantity {
            return Err(StoreError::InsufficientStock {
                product_id: id.clone(),
                requested: quantity,
            });
        }
        product.available -= quantity;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for MemoryUnitOfWork {
    async fn find_by_id(&mut self, id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        Ok(self.state.outbox.get(&id).cloned())
    }

    async fn save(&mut self, event: &OutboxEvent) -> Result<()> {
        self.writes += 1;
        self.state.outbox.insert(event.id, event.clone());
        Ok(())
    }

    async fn find_pending(&mut self, retry_budget: u32, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut events: Vec<_> = self
            .state
            .outbox
            .values()
            .filter(|e| e.is_pending(retry_budget))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit);
        Ok(events)
    }

    async fn find_exhausted(
        &mut self,
        retry_budget: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>> {
        let mut events: Vec<_> = self
            .state
            .outbox
            .values()
            .filter(|e| e.is_exhausted(retry_budget))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::UserId;
    use domain::{Money, NewOrder, OrderItem};

    fn sample_order() -> Order {
        Order::create(NewOrder::new(
            UserId::new(),
            vec![OrderItem::new("P-1", "Tea", "T-1", Money::from_minor(500), 2)],
            "1 Main St",
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn committed_unit_is_visible() {
        let store = InMemoryStore::new();
        let order = sample_order();
        let to_save = order.clone();

        store
            .transaction(move |uow| {
                Box::pin(async move {
                    uow.orders().save(&to_save).await?;
                    Ok::<_, StoreError>(())
                })
            })
            .await
            .unwrap();

        assert_eq!(store.order(order.id()).await, Some(order));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn failed_unit_rolls_back_every_repository() {
        let store = InMemoryStore::new();
        store
            .insert_product(Product::new("P-1", "Tea", "T-1", Money::from_minor(500), 5))
            .await;
        let order = sample_order();
        let to_save = order.clone();

        let result = store
            .transaction(move |uow| {
                Box::pin(async move {
                    uow.orders().save(&to_save).await?;
                    uow.products().decrement_stock(&"P-1".into(), 2).await?;
                    uow.products().decrement_stock(&"P-1".into(), 10).await?;
                    Ok::<_, StoreError>(())
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock { requested: 10, .. })
        ));
        assert!(store.order(order.id()).await.is_none());
        assert_eq!(store.product(&"P-1".into()).await.unwrap().available, 5);
    }

    #[tokio::test]
    async fn second_pending_payment_is_a_conflict() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store
            .put_payment(Payment::pending(order_id, Money::from_minor(100)))
            .await;

        let result = store
            .transaction(move |uow| {
                Box::pin(async move {
                    uow.payments()
                        .save(&Payment::pending(order_id, Money::from_minor(100)))
                        .await
                })
            })
            .await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.payments_for_order(order_id).await.len(), 1);
    }

    #[tokio::test]
    async fn pending_queries_filter_and_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut old = Payment::pending(OrderId::new(), Money::from_minor(1));
        old.created_at = now - Duration::minutes(30);
        let mut older = Payment::pending(OrderId::new(), Money::from_minor(1));
        older.created_at = now - Duration::minutes(60);
        let fresh = Payment::pending(OrderId::new(), Money::from_minor(1));
        let mut resolved = Payment::pending(OrderId::new(), Money::from_minor(1))
            .fail()
            .unwrap();
        resolved.created_at = now - Duration::minutes(90);
        for p in [old.clone(), older.clone(), fresh, resolved] {
            store.put_payment(p).await;
        }

        let stale = store
            .query(move |uow| {
                Box::pin(async move {
                    uow.payments()
                        .find_pending_created_before(now - Duration::minutes(10))
                        .await
                })
            })
            .await
            .unwrap();

        let ids: Vec<_> = stale.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![older.id, old.id]);
    }

    #[tokio::test]
    async fn outbox_pending_respects_budget_and_limit() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut exhausted = OutboxEvent::new("T", serde_json::json!({}));
        exhausted.retry_count = 3;
        let done = OutboxEvent::new("T", serde_json::json!({})).mark_processed(now);
        let mut first = OutboxEvent::new("T", serde_json::json!({}));
        first.created_at = now - Duration::seconds(10);
        let second = OutboxEvent::new("T", serde_json::json!({}));
        for e in [exhausted, done, first.clone(), second] {
            store.put_outbox_event(e).await;
        }

        let pending = store
            .query(|uow| Box::pin(async move { uow.outbox().find_pending(3, 1).await }))
            .await
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
    }

    #[tokio::test]
    async fn hook_runs_once_before_the_next_unit() {
        let store = InMemoryStore::new();
        store
            .insert_product(Product::new("P-1", "Tea", "T-1", Money::from_minor(500), 5))
            .await;
        store.before_next_unit(|state| {
            if let Some(p) = state.products.get_mut(&ProductId::new("P-1")) {
                p.available = 1;
            }
        });

        let read = |store: InMemoryStore| async move {
            store
                .query(|uow| {
                    Box::pin(async move { uow.products().find_by_id(&"P-1".into()).await })
                })
                .await
                .unwrap()
                .unwrap()
                .available
        };

        assert_eq!(read(store.clone()).await, 1);
        store
            .insert_product(Product::new("P-1", "Tea", "T-1", Money::from_minor(500), 5))
            .await;
        assert_eq!(read(store.clone()).await, 5);
    }
}
