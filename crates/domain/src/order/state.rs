//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Picking ──► Payment ──► Delivery ──► Closed
///    │           │           │
///    └───────────┴───────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Order placed by the customer, not yet touched by staff.
    #[default]
    Created,

    /// Staff is collecting the items; quantities may still change.
    Picking,

    /// Picking done, waiting for the customer to pay.
    Payment,

    /// Paid and handed over for delivery.
    Delivery,

    /// Delivered and closed by staff (terminal state).
    Closed,

    /// Cancelled before payment completed (terminal state).
    Cancelled,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderState; 6] = [
        OrderState::Created,
        OrderState::Picking,
        OrderState::Payment,
        OrderState::Delivery,
        OrderState::Closed,
        OrderState::Cancelled,
    ];

    /// Returns true if the transition table allows moving from `self` to `target`.
    pub fn can_transition_to(&self, target: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, target),
            (Created, Picking)
                | (Picking, Payment)
                | (Payment, Delivery)
                | (Delivery, Closed)
                | (Created | Picking | Payment, Cancelled)
        )
    }

    /// Returns true if items can be modified in this state.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderState::Picking)
    }

    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        self.can_transition_to(OrderState::Cancelled)
    }

    /// Returns true if payment for the order has already gone through.
    pub fn is_paid(&self) -> bool {
        matches!(self, OrderState::Delivery | OrderState::Closed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Closed | OrderState::Cancelled)
    }

    /// Returns the state name as stored and exposed over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "CREATED",
            OrderState::Picking => "PICKING",
            OrderState::Payment => "PAYMENT",
            OrderState::Delivery => "DELIVERY",
            OrderState::Closed => "CLOSED",
            OrderState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown order state: {s}"))
    }
}
