//! ERP export port and in-memory implementation.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::OrderId;
use domain::OrderItem;
use thiserror::Error;

/// Errors reported by the ERP.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    /// The ERP does not know one of the articles. Retrying will not help.
    #[error("ERP could not resolve order items: {0}")]
    ItemsNotResolvable(String),

    /// Rate limit, timeout or outage.
    #[error("ERP export failed: {0}")]
    Transient(String),
}

impl ExportError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExportError::ItemsNotResolvable(_))
    }
}

/// Trait for exporting delivered orders to the ERP.
#[async_trait]
pub trait ErpExportGateway: Send + Sync {
    async fn export_order(&self, order_id: OrderId, items: &[OrderItem]) -> Result<(), ExportError>;
}

#[derive(Debug, Default)]
struct InMemoryErpState {
    exports: Vec<(OrderId, Vec<OrderItem>)>,
    scripted: VecDeque<ExportError>,
    calls: usize,
}

/// In-memory ERP for tests and local runs.
///
/// Scripted failures are consumed one per call, in order; once the script is
/// empty every export succeeds.
#[derive(Debug, Clone, Default)]
pub struct InMemoryErpGateway {
    state: Arc<RwLock<InMemoryErpState>>,
}

impl InMemoryErpGateway {
    /// Creates a new in-memory ERP gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryErpState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryErpState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next export call fail with `error`.
    pub fn push_failure(&self, error: ExportError) {
        self.write().scripted.push_back(error);
    }

    /// Number of export calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.read().calls
    }

    /// Number of successful exports.
    pub fn export_count(&self) -> usize {
        self.read().exports.len()
    }

    /// Items exported for an order, if it was exported.
    pub fn exported_items(&self, order_id: OrderId) -> Option<Vec<OrderItem>> {
        self.read()
            .exports
            .iter()
            .find(|(id, _)| *id == order_id)
            .map(|(_, items)| items.clone())
    }
}

#[async_trait]
impl ErpExportGateway for InMemoryErpGateway {
    async fn export_order(&self, order_id: OrderId, items: &[OrderItem]) -> Result<(), ExportError> {
        let mut state = self.write();
        state.calls += 1;

        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }

        state.exports.push((order_id, items.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let erp = InMemoryErpGateway::new();
        erp.push_failure(ExportError::Transient("429".to_string()));
        let order_id = OrderId::new();
        let items = vec![OrderItem::new("P-1", "Tea", "T-1", Money::from_minor(500), 1)];

        assert!(erp.export_order(order_id, &items).await.is_err());
        assert!(erp.export_order(order_id, &items).await.is_ok());

        assert_eq!(erp.call_count(), 2);
        assert_eq!(erp.export_count(), 1);
        assert_eq!(erp.exported_items(order_id), Some(items));
    }

    #[test]
    fn test_only_unresolvable_items_is_permanent() {
        assert!(ExportError::ItemsNotResolvable("A-1".into()).is_permanent());
        assert!(!ExportError::Transient("timeout".into()).is_permanent());
    }
}
