//! Order aggregate implementation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::product::Product;

use super::{
    AbsenceStrategy, ItemQuantity, Money, NewOrder, OrderError, OrderItem, OrderState, ProductId,
};

/// Order aggregate root.
///
/// Every mutation returns a new `Order`; the receiver is never changed. This
/// keeps the state machine free of storage concerns: callers decide when the
/// new value is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    total: Money,
    state: OrderState,
    delivery_address: String,
    absence_strategy: AbsenceStrategy,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the lines in the order they were placed.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the line for a product, if the order has one.
    pub fn get_item(&self, product_id: &ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|item| &item.product_id == product_id)
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn delivery_address(&self) -> &str {
        &self.delivery_address
    }

    pub fn absence_strategy(&self) -> AbsenceStrategy {
        self.absence_strategy
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Creation and transitions
impl Order {
    /// Places a new order in `CREATED` state.
    ///
    /// The total is always computed from the lines.
    pub fn create(cmd: NewOrder) -> Result<Order, OrderError> {
        validate_items(&cmd.items)?;
        if cmd.delivery_address.trim().is_empty() {
            return Err(OrderError::BlankAddress);
        }
        let total = compute_total(&cmd.items)?;

        let now = Utc::now();
        Ok(Order {
            id: OrderId::new(),
            user_id: cmd.user_id,
            total,
            items: cmd.items,
            state: OrderState::Created,
            delivery_address: cmd.delivery_address.trim().to_string(),
            absence_strategy: cmd.absence_strategy,
            created_at: now,
            updated_at: now,
        })
    }

    /// `CREATED → PICKING`
    pub fn start_picking(&self) -> Result<Order, OrderError> {
        self.transition(OrderState::Picking)
    }

    /// `PICKING → PAYMENT`
    pub fn complete_picking(&self) -> Result<Order, OrderError> {
        self.transition(OrderState::Payment)
    }

    /// `PAYMENT → DELIVERY`
    pub fn mark_paid(&self) -> Result<Order, OrderError> {
        self.transition(OrderState::Delivery)
    }

    /// `DELIVERY → CLOSED`
    pub fn close(&self) -> Result<Order, OrderError> {
        self.transition(OrderState::Closed)
    }

    /// `CREATED | PICKING | PAYMENT → CANCELLED`
    pub fn cancel(&self) -> Result<Order, OrderError> {
        self.transition(OrderState::Cancelled)
    }

    fn transition(&self, target: OrderState) -> Result<Order, OrderError> {
        if !self.state.can_transition_to(target) {
            return Err(OrderError::InvalidState {
                actual: self.state,
                attempted: target,
            });
        }

        Ok(Order {
            state: target,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}

// Picking
impl Order {
    /// Returns the products in `picked` that have no line in this order yet
    /// and therefore need a fresh catalog snapshot.
    pub fn new_products(&self, picked: &[ItemQuantity]) -> Vec<ProductId> {
        picked
            .iter()
            .filter(|line| self.get_item(&line.product_id).is_none())
            .map(|line| line.product_id.clone())
            .collect()
    }

    /// Replaces the lines with the picked list.
    ///
    /// Existing lines keep their price/name/article snapshot and only change
    /// quantity. New products are snapshotted from `catalog`. Lines missing
    /// from `picked` are dropped.
    pub fn with_picked_items(
        &self,
        picked: &[ItemQuantity],
        catalog: &HashMap<ProductId, Product>,
    ) -> Result<Order, OrderError> {
        if !self.state.can_modify_items() {
            return Err(OrderError::InvalidState {
                actual: self.state,
                attempted: OrderState::Picking,
            });
        }

        let mut items = Vec::with_capacity(picked.len());
        for line in picked {
            let item = match self.get_item(&line.product_id) {
                Some(existing) => OrderItem {
                    quantity: line.quantity,
                    ..existing.clone()
                },
                None => catalog
                    .get(&line.product_id)
                    .map(|product| product.snapshot(line.quantity))
                    .ok_or_else(|| OrderError::ProductNotFound {
                        product_id: line.product_id.clone(),
                    })?,
            };
            items.push(item);
        }
        validate_items(&items)?;

        Ok(Order {
            total: compute_total(&items)?,
            items,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}

fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::NoItems);
    }

    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            });
        }
        if item.price.is_negative() {
            return Err(OrderError::InvalidPrice {
                product_id: item.product_id.clone(),
                price: item.price,
            });
        }
        if !seen.insert(&item.product_id) {
            return Err(OrderError::DuplicateProduct {
                product_id: item.product_id.clone(),
            });
        }
    }
    Ok(())
}

fn compute_total(items: &[OrderItem]) -> Result<Money, OrderError> {
    items.iter().try_fold(Money::zero(), |total, item| {
        item.line_total()
            .and_then(|line| total.checked_add(line))
            .ok_or_else(|| OrderError::TotalOverflow {
                product_id: item.product_id.clone(),
            })
    })
}

/// Flat, storage-facing form of an [`Order`].
///
/// Converting back into an `Order` re-validates every invariant, so a
/// tampered row is rejected instead of flowing into the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total: Money,
    pub state: OrderState,
    pub delivery_address: String,
    pub absence_strategy: AbsenceStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        OrderRecord {
            id: order.id,
            user_id: order.user_id,
            items: order.items.clone(),
            total: order.total,
            state: order.state,
            delivery_address: order.delivery_address.clone(),
            absence_strategy: order.absence_strategy,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl TryFrom<OrderRecord> for Order {
    type Error = OrderError;

    fn try_from(record: OrderRecord) -> Result<Self, Self::Error> {
        validate_items(&record.items)?;
        if record.delivery_address.trim().is_empty() {
            return Err(OrderError::BlankAddress);
        }
        let computed = compute_total(&record.items)?;
        if computed != record.total {
            return Err(OrderError::TotalMismatch {
                stored: record.total,
                computed,
            });
        }

        Ok(Order {
            id: record.id,
            user_id: record.user_id,
            items: record.items,
            total: record.total,
            state: record.state,
            delivery_address: record.delivery_address,
            absence_strategy: record.absence_strategy,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
