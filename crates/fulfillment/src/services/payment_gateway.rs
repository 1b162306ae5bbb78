//! Payment provider port and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{OrderId, PaymentId};
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown provider payment: {0}")]
    UnknownPayment(String),
}

/// A charge created at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub external_id: String,
    /// Page where the customer completes the payment.
    pub confirmation_url: String,
}

/// Provider-side status of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Succeeded,
    Canceled,
}

/// Trait for the external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a charge.
    ///
    /// `idempotency_key` is the internal payment id: repeating the call with
    /// the same key returns the charge created the first time.
    async fn create_payment(
        &self,
        idempotency_key: PaymentId,
        order_id: OrderId,
        amount: Money,
        description: &str,
        return_url: &str,
    ) -> Result<GatewayPayment, GatewayError>;

    /// Asks the provider for the current status of a charge.
    async fn payment_status(&self, external_id: &str) -> Result<GatewayStatus, GatewayError>;
}

#[derive(Debug, Clone)]
struct Charge {
    payment: GatewayPayment,
    order_id: OrderId,
    amount: Money,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: HashMap<PaymentId, Charge>,
    statuses: HashMap<String, GatewayStatus>,
    next_id: u32,
    create_calls: usize,
    fail_on_create: bool,
    fail_on_status: bool,
}

/// In-memory payment provider for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to fail every create call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    /// Configures the gateway to fail every status lookup.
    pub fn set_fail_on_status(&self, fail: bool) {
        self.write().fail_on_status = fail;
    }

    /// Simulates the customer finishing (or abandoning) the payment.
    pub fn set_status(&self, external_id: &str, status: GatewayStatus) {
        self.write().statuses.insert(external_id.to_string(), status);
    }

    /// Number of `create_payment` calls received, including failed ones.
    pub fn create_calls(&self) -> usize {
        self.read().create_calls
    }

    /// Number of distinct charges created.
    pub fn charge_count(&self) -> usize {
        self.read().charges.len()
    }

    /// Amount charged for an order, if a charge exists.
    pub fn charged_amount(&self, order_id: OrderId) -> Option<Money> {
        self.read()
            .charges
            .values()
            .find(|c| c.order_id == order_id)
            .map(|c| c.amount)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_payment(
        &self,
        idempotency_key: PaymentId,
        order_id: OrderId,
        amount: Money,
        _description: &str,
        return_url: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let mut state = self.write();
        state.create_calls += 1;

        if state.fail_on_create {
            return Err(GatewayError::Unavailable("Provider timed out".to_string()));
        }

        if let Some(existing) = state.charges.get(&idempotency_key) {
            return Ok(existing.payment.clone());
        }

        state.next_id += 1;
        let external_id = format!("ext-{:06}", state.next_id);
        let payment = GatewayPayment {
            confirmation_url: format!("{return_url}?payment={external_id}"),
            external_id: external_id.clone(),
        };
        state.charges.insert(
            idempotency_key,
            Charge {
                payment: payment.clone(),
                order_id,
                amount,
            },
        );
        state.statuses.insert(external_id, GatewayStatus::Pending);

        Ok(payment)
    }

    async fn payment_status(&self, external_id: &str) -> Result<GatewayStatus, GatewayError> {
        let state = self.read();
        if state.fail_on_status {
            return Err(GatewayError::Unavailable("Provider timed out".to_string()));
        }
        state
            .statuses
            .get(external_id)
            .copied()
            .ok_or_else(|| GatewayError::UnknownPayment(external_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create(gateway: &InMemoryPaymentGateway, key: PaymentId) -> GatewayPayment {
        gateway
            .create_payment(
                key,
                OrderId::new(),
                Money::from_minor(1000),
                "Order",
                "https://shop.test/return",
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_key_returns_same_charge() {
        let gateway = InMemoryPaymentGateway::new();
        let key = PaymentId::new();

        let first = create(&gateway, key).await;
        let second = create(&gateway, key).await;

        assert_eq!(first, second);
        assert_eq!(gateway.charge_count(), 1);
        assert_eq!(gateway.create_calls(), 2);
        assert!(first.confirmation_url.starts_with("https://shop.test/return"));
    }

    #[tokio::test]
    async fn test_status_follows_customer() {
        let gateway = InMemoryPaymentGateway::new();
        let charge = create(&gateway, PaymentId::new()).await;

        assert_eq!(
            gateway.payment_status(&charge.external_id).await.unwrap(),
            GatewayStatus::Pending
        );
        gateway.set_status(&charge.external_id, GatewayStatus::Succeeded);
        assert_eq!(
            gateway.payment_status(&charge.external_id).await.unwrap(),
            GatewayStatus::Succeeded
        );
        assert!(matches!(
            gateway.payment_status("nope").await,
            Err(GatewayError::UnknownPayment(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_on_create(true);

        let result = gateway
            .create_payment(
                PaymentId::new(),
                OrderId::new(),
                Money::from_minor(1),
                "Order",
                "https://shop.test/return",
            )
            .await;

        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
        assert_eq!(gateway.charge_count(), 0);
    }
}
