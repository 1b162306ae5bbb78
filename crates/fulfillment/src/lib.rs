//! Use cases of the order fulfillment core.
//!
//! This crate provides:
//! - staff order operations ([`OrderService`])
//! - payment initiation and confirmation ([`PaymentCoordinator`])
//! - the payment and order timeout sweeps and the outbox dispatcher
//! - the payment provider and ERP ports with in-memory implementations
//!
//! Provider and ERP calls are never made while a transaction is open.

pub mod error;
pub mod jobs;
pub mod orders;
pub mod payments;
pub mod services;

pub use error::{FulfillmentError, Result};
pub use jobs::{
    Job, JobSettings, OrderPaymentTimeoutJob, OrderSweepReport, OutboxDispatcher, OutboxReport,
    PaymentSweepReport, PaymentTimeoutJob,
};
pub use orders::OrderService;
pub use payments::{ConfirmOutcome, PaymentCoordinator, PaymentEvent, PaymentInitiation};
pub use services::{
    ErpExportGateway, ExportError, GatewayError, GatewayPayment, GatewayStatus,
    InMemoryErpGateway, InMemoryPaymentGateway, PaymentGateway,
};
