//! Order aggregate and related types.

mod aggregate;
mod commands;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderRecord};
pub use commands::{ItemQuantity, NewOrder};
pub use state::OrderState;
pub use value_objects::{AbsenceStrategy, Money, OrderItem, ProductId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The transition table does not allow this move.
    #[error("Invalid order state: cannot move from {actual} to {attempted}")]
    InvalidState {
        actual: OrderState,
        attempted: OrderState,
    },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Negative price.
    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// Same product listed twice.
    #[error("Product {product_id} listed more than once")]
    DuplicateProduct { product_id: ProductId },

    /// Delivery address is empty.
    #[error("Delivery address is required")]
    BlankAddress,

    /// A new line refers to a product the catalog does not know.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// The order total does not fit in the money range.
    #[error("Order total overflows at product {product_id}")]
    TotalOverflow { product_id: ProductId },

    /// A stored order whose total disagrees with its lines.
    #[error("Stored total {stored} does not match computed total {computed}")]
    TotalMismatch { stored: Money, computed: Money },
}
