//! Inputs for order operations.

use common::UserId;
use serde::{Deserialize, Serialize};

use super::{AbsenceStrategy, OrderItem, ProductId};

/// Everything needed to place an order.
///
/// Items arrive already snapshotted by the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub delivery_address: String,
    #[serde(default)]
    pub absence_strategy: AbsenceStrategy,
}

impl NewOrder {
    pub fn new(user_id: UserId, items: Vec<OrderItem>, delivery_address: impl Into<String>) -> Self {
        Self {
            user_id,
            items,
            delivery_address: delivery_address.into(),
            absence_strategy: AbsenceStrategy::default(),
        }
    }

    pub fn with_absence_strategy(mut self, strategy: AbsenceStrategy) -> Self {
        self.absence_strategy = strategy;
        self
    }
}

/// One picked line: which product and how many units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantity {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ItemQuantity {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}
