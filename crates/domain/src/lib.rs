//! Domain layer of the order fulfillment core.
//!
//! This crate provides:
//! - the order aggregate and its pure state machine
//! - payment attempts and their one-shot resolution
//! - outbox events reporting facts owed to the ERP
//! - the catalog product view used for snapshots and stock checks

pub mod order;
pub mod outbox;
pub mod payment;
pub mod product;

pub use order::{
    AbsenceStrategy, ItemQuantity, Money, NewOrder, Order, OrderError, OrderItem, OrderRecord,
    OrderState, ProductId,
};
pub use outbox::{
    DEFAULT_RETRY_BUDGET, ORDER_DELIVERED, OrderDeliveredPayload, OutboxError, OutboxEvent,
    OutboxMessage,
};
pub use payment::{Payment, PaymentError, PaymentStatus};
pub use product::Product;
