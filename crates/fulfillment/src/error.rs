//! Fulfillment error types.

use common::{OrderId, PaymentId};
use domain::{OrderError, OutboxError, PaymentError, ProductId};
use store::StoreError;
use thiserror::Error;

use crate::services::GatewayError;

/// Errors that can occur in fulfillment use cases.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Order validation or state machine rejection.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Payment status change rejected.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Storage error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Outbox event could not be built.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// Payment provider error.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// No payment matches the given reference.
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The order has already been paid.
    #[error("Order {0} has already been paid")]
    AlreadyProcessed(OrderId),

    /// A payment for the order is still pending at the provider.
    #[error("Order {order_id} already has a payment in progress")]
    PaymentInProgress {
        order_id: OrderId,
        confirmation_url: Option<String>,
    },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The provider took the money but the goods are gone.
    #[error("Payment {payment_id} for order {order_id} succeeded without stock; refund required")]
    RefundRequired {
        order_id: OrderId,
        payment_id: PaymentId,
    },
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
