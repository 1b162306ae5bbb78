//! Staff-facing order operations.

use std::collections::HashMap;

use common::OrderId;
use domain::{ItemQuantity, NewOrder, Order, OrderError};
use store::{Store, UnitOfWork};

use crate::error::{FulfillmentError, Result};

type Transition = fn(&Order) -> std::result::Result<Order, OrderError>;

/// Service for managing orders.
///
/// Every operation loads the order, applies a pure transition and saves the
/// result in one transaction.
#[derive(Clone)]
pub struct OrderService<S> {
    store: S,
}

impl<S: Store> OrderService<S> {
    /// Creates a new order service on top of the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Places a new order in `CREATED` state.
    #[tracing::instrument(skip(self, cmd), fields(user_id = %cmd.user_id))]
    pub async fn create_order(&self, cmd: NewOrder) -> Result<Order> {
        let order = Order::create(cmd)?;
        let to_save = order.clone();
        self.store
            .transaction(move |uow| Box::pin(save_order(uow, to_save)))
            .await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id(), total = %order.total(), "Order created");
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .query(move |uow| Box::pin(load_order(uow, order_id)))
            .await
    }

    /// `CREATED → PICKING`
    #[tracing::instrument(skip(self))]
    pub async fn start_picking(&self, order_id: OrderId) -> Result<Order> {
        self.apply(order_id, Order::start_picking).await
    }

    /// `PICKING → PAYMENT`
    #[tracing::instrument(skip(self))]
    pub async fn complete_picking(&self, order_id: OrderId) -> Result<Order> {
        self.apply(order_id, Order::complete_picking).await
    }

    /// `DELIVERY → CLOSED`
    #[tracing::instrument(skip(self))]
    pub async fn close_order(&self, order_id: OrderId) -> Result<Order> {
        self.apply(order_id, Order::close).await
    }

    /// Cancels the order and fails its pending payment, if any.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .transaction(move |uow| Box::pin(cancel_order(uow, order_id)))
            .await?;
        tracing::info!(%order_id, "Order cancelled");
        Ok(order)
    }

    /// Replaces the order lines with the picked list.
    #[tracing::instrument(skip(self, picked))]
    pub async fn update_items(&self, order_id: OrderId, picked: Vec<ItemQuantity>) -> Result<Order> {
        let order = self
            .store
            .transaction(move |uow| Box::pin(update_items(uow, order_id, picked)))
            .await?;
        tracing::info!(%order_id, items = order.items().len(), total = %order.total(), "Order items updated");
        Ok(order)
    }

    async fn apply(&self, order_id: OrderId, transition: Transition) -> Result<Order> {
        let order = self
            .store
            .transaction(move |uow| Box::pin(apply_transition(uow, order_id, transition)))
            .await?;
        tracing::info!(%order_id, state = %order.state(), "Order state changed");
        Ok(order)
    }
}

pub(crate) async fn load_order(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<Order> {
    uow.orders()
        .find_by_id(order_id)
        .await?
        .ok_or(FulfillmentError::OrderNotFound(order_id))
}

async fn save_order(uow: &mut dyn UnitOfWork, order: Order) -> Result<()> {
    uow.orders().save(&order).await?;
    Ok(())
}

async fn apply_transition(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    transition: Transition,
) -> Result<Order> {
    let order = transition(&load_order(uow, order_id).await?)?;
    uow.orders().save(&order).await?;
    Ok(order)
}

async fn cancel_order(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<Order> {
    let order = load_order(uow, order_id).await?.cancel()?;
    uow.orders().save(&order).await?;

    if let Some(payment) = uow.payments().find_pending_by_order(order_id).await? {
        let payment = payment.fail()?;
        uow.payments().save(&payment).await?;
        tracing::info!(%order_id, payment_id = %payment.id, "Pending payment failed with its order");
    }
    Ok(order)
}

async fn update_items(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    picked: Vec<ItemQuantity>,
) -> Result<Order> {
    let order = load_order(uow, order_id).await?;

    let mut catalog = HashMap::new();
    for product_id in order.new_products(&picked) {
        if let Some(product) = uow.products().find_by_id(&product_id).await? {
            catalog.insert(product_id, product);
        }
    }

    let order = order.with_picked_items(&picked, &catalog)?;
    uow.orders().save(&order).await?;
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UserId;
    use domain::{Money, OrderItem, OrderState, Payment, PaymentStatus, Product};
    use store::InMemoryStore;

    fn new_order() -> NewOrder {
        NewOrder::new(
            UserId::new(),
            vec![OrderItem::new("P-1", "Tea", "T-1", Money::from_minor(500), 2)],
            "1 Main St",
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());

        let order = service.create_order(new_order()).await.unwrap();
        let loaded = service.get_order(order.id()).await.unwrap();

        assert_eq!(loaded, order);
        assert_eq!(loaded.state(), OrderState::Created);
        assert_eq!(loaded.total(), Money::from_minor(1000));
    }

    #[tokio::test]
    async fn test_invalid_order_is_not_stored() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());

        let err = service
            .create_order(NewOrder::new(UserId::new(), vec![], "1 Main St"))
            .await
            .unwrap_err();

        assert!(matches!(err, FulfillmentError::Order(OrderError::NoItems)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let service = OrderService::new(InMemoryStore::new());
        let id = OrderId::new();
        assert!(matches!(
            service.start_picking(id).await,
            Err(FulfillmentError::OrderNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_rejected_transition_keeps_stored_state() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let order = service.create_order(new_order()).await.unwrap();

        let err = service.close_order(order.id()).await.unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::Order(OrderError::InvalidState {
                actual: OrderState::Created,
                attempted: OrderState::Closed,
            })
        ));
        assert_eq!(
            store.order(order.id()).await.unwrap().state(),
            OrderState::Created
        );
    }

    #[tokio::test]
    async fn test_update_items_snapshots_new_products() {
        let store = InMemoryStore::new();
        store
            .insert_product(Product::new("P-2", "Milk", "M-1", Money::from_minor(300), 10))
            .await;
        let service = OrderService::new(store.clone());
        let order = service.create_order(new_order()).await.unwrap();
        service.start_picking(order.id()).await.unwrap();

        let updated = service
            .update_items(
                order.id(),
                vec![ItemQuantity::new("P-1", 1), ItemQuantity::new("P-2", 3)],
            )
            .await
            .unwrap();

        assert_eq!(updated.items().len(), 2);
        assert_eq!(updated.total(), Money::from_minor(500 + 900));
        assert_eq!(store.order(order.id()).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_items_with_unknown_product() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let order = service.create_order(new_order()).await.unwrap();
        let picking = service.start_picking(order.id()).await.unwrap();

        let err = service
            .update_items(order.id(), vec![ItemQuantity::new("P-404", 1)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::Order(OrderError::ProductNotFound { .. })
        ));
        assert_eq!(store.order(order.id()).await.unwrap(), picking);
    }

    #[tokio::test]
    async fn test_cancel_fails_pending_payment() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let order = service.create_order(new_order()).await.unwrap();
        service.start_picking(order.id()).await.unwrap();
        service.complete_picking(order.id()).await.unwrap();
        let payment = Payment::pending(order.id(), order.total());
        store.put_payment(payment.clone()).await;

        let cancelled = service.cancel_order(order.id()).await.unwrap();

        assert_eq!(cancelled.state(), OrderState::Cancelled);
        assert_eq!(
            store.payment(payment.id).await.unwrap().status,
            PaymentStatus::Failed
        );
    }
}
