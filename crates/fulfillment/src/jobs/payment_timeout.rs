use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::PaymentId;
use serde::{Deserialize, Serialize};
use store::{Store, UnitOfWork};

use super::{Job, horizon, record_duration};
use crate::error::Result;
use crate::orders::load_order;
use crate::payments::cancel_if_possible;

/// Counters for one payment sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSweepReport {
    pub expired: usize,
    /// Payments resolved by someone else between listing and locking.
    pub skipped: usize,
    pub errors: usize,
}

/// Fails `PENDING` payments the customer never completed and cancels their
/// orders.
#[derive(Clone)]
pub struct PaymentTimeoutJob<S> {
    store: S,
    timeout: Duration,
}

impl<S: Store> PaymentTimeoutJob<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn execute(&self) -> Result<PaymentSweepReport> {
        self.execute_at(Utc::now()).await
    }

    /// Runs one sweep treating `now` as the current time.
    #[tracing::instrument(skip(self))]
    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<PaymentSweepReport> {
        let started = Instant::now();
        let created_before = horizon(now, self.timeout);
        let stale = self
            .store
            .query(move |uow| {
                Box::pin(async move {
                    uow.payments()
                        .find_pending_created_before(created_before)
                        .await
                })
            })
            .await?;

        let mut report = PaymentSweepReport::default();
        for payment in stale {
            let payment_id = payment.id;
            match self
                .store
                .transaction(move |uow| Box::pin(expire_payment(uow, payment_id)))
                .await
            {
                Ok(true) => {
                    report.expired += 1;
                    tracing::info!(%payment_id, order_id = %payment.order_id, "Payment expired");
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(%payment_id, error = %e, "Failed to expire payment");
                }
            }
        }

        metrics::counter!("payment_sweep_expired_total").increment(report.expired as u64);
        record_duration(self.name(), started);
        Ok(report)
    }
}

async fn expire_payment(uow: &mut dyn UnitOfWork, payment_id: PaymentId) -> Result<bool> {
    let Some(payment) = uow.payments().find_by_id(payment_id).await? else {
        return Ok(false);
    };
    if !payment.is_pending() {
        return Ok(false);
    }

    uow.payments().save(&payment.fail()?).await?;
    let order = load_order(uow, payment.order_id).await?;
    cancel_if_possible(uow, &order).await?;
    Ok(true)
}

#[async_trait]
impl<S: Store> Job for PaymentTimeoutJob<S> {
    fn name(&self) -> &'static str {
        "payment-timeout"
    }

    async fn run(&self) -> Result<serde_json::Value> {
        let report = self.execute().await?;
        Ok(serde_json::to_value(report)?)
    }
}
