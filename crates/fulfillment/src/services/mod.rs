//! External collaborator traits and in-memory implementations.

pub mod erp;
pub mod payment_gateway;

pub use erp::{ErpExportGateway, ExportError, InMemoryErpGateway};
pub use payment_gateway::{
    GatewayError, GatewayPayment, GatewayStatus, InMemoryPaymentGateway, PaymentGateway,
};
