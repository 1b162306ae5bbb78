use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::OrderState;
use serde::{Deserialize, Serialize};
use store::{Store, UnitOfWork};

use super::{Job, horizon, record_duration};
use crate::error::Result;
use crate::orders::load_order;

/// Counters for one order sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSweepReport {
    pub cancelled: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Cancels orders stuck in `PAYMENT` with no payment in flight.
///
/// Runs on a longer horizon than [`super::PaymentTimeoutJob`] so that a
/// payment the provider is still working on is expired there first.
#[derive(Clone)]
pub struct OrderPaymentTimeoutJob<S> {
    store: S,
    timeout: Duration,
}

impl<S: Store> OrderPaymentTimeoutJob<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn execute(&self) -> Result<OrderSweepReport> {
        self.execute_at(Utc::now()).await
    }

    /// Runs one sweep treating `now` as the current time.
    #[tracing::instrument(skip(self))]
    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<OrderSweepReport> {
        let started = Instant::now();
        let updated_before = horizon(now, self.timeout);
        let waiting = self
            .store
            .query(move |uow| {
                Box::pin(async move {
                    uow.orders()
                        .find_by_state(OrderState::Payment, updated_before)
                        .await
                })
            })
            .await?;

        let mut report = OrderSweepReport::default();
        for order in waiting {
            let order_id = order.id();
            match self
                .store
                .transaction(move |uow| Box::pin(cancel_unpaid(uow, order_id)))
                .await
            {
                Ok(true) => {
                    report.cancelled += 1;
                    tracing::info!(%order_id, "Order cancelled after payment timeout");
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(%order_id, error = %e, "Failed to cancel unpaid order");
                }
            }
        }

        metrics::counter!("order_sweep_cancelled_total").increment(report.cancelled as u64);
        record_duration(self.name(), started);
        Ok(report)
    }
}

async fn cancel_unpaid(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<bool> {
    let order = load_order(uow, order_id).await?;
    if order.state() != OrderState::Payment {
        return Ok(false);
    }
    if uow
        .payments()
        .find_pending_by_order(order_id)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    uow.orders().save(&order.cancel()?).await?;
    Ok(true)
}

#[async_trait]
impl<S: Store> Job for OrderPaymentTimeoutJob<S> {
    fn name(&self) -> &'static str {
        "order-payment-timeout"
    }

    async fn run(&self) -> Result<serde_json::Value> {
        let report = self.execute().await?;
        Ok(serde_json::to_value(report)?)
    }
}
