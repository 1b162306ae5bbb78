use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{OutboxEvent, OutboxMessage};
use serde::{Deserialize, Serialize};
use store::{Store, UnitOfWork};

use super::{Job, record_duration};
use crate::error::Result;
use crate::services::ErpExportGateway;

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxReport {
    pub processed: usize,
    /// Transient failures left pending for another attempt.
    pub retried: usize,
    pub failed: usize,
    /// Events another dispatcher resolved while this one was exporting.
    pub skipped: usize,
}

/// Delivers pending outbox events to the ERP.
///
/// Delivery is at least once: an export that succeeds but whose bookkeeping
/// fails is repeated on the next pass.
#[derive(Clone)]
pub struct OutboxDispatcher<S, E> {
    store: S,
    erp: E,
    retry_budget: u32,
    batch_size: usize,
}

impl<S, E> OutboxDispatcher<S, E>
where
    S: Store,
    E: ErpExportGateway,
{
    pub fn new(store: S, erp: E, retry_budget: u32, batch_size: usize) -> Self {
        Self {
            store,
            erp,
            retry_budget,
            batch_size,
        }
    }

    pub async fn execute(&self) -> Result<OutboxReport> {
        self.execute_at(Utc::now()).await
    }

    /// Runs one pass treating `now` as the current time.
    #[tracing::instrument(skip(self))]
    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<OutboxReport> {
        let started = Instant::now();
        let (budget, limit) = (self.retry_budget, self.batch_size);
        let (exhausted, pending) = self
            .store
            .query(move |uow| {
                Box::pin(async move {
                    let exhausted = uow.outbox().find_exhausted(budget, limit).await?;
                    let pending = uow.outbox().find_pending(budget, limit).await?;
                    Ok::<_, store::StoreError>((exhausted, pending))
                })
            })
            .await?;

        let mut report = OutboxReport::default();

        for event in exhausted {
            let updated = event.mark_failed(
                format!("retry budget of {budget} exhausted after {} retries", event.retry_count),
                now,
            );
            self.record(&event, updated, &mut report).await;
        }

        for event in pending {
            let updated = self.deliver(&event, now).await;
            self.record(&event, updated, &mut report).await;
        }

        metrics::counter!("outbox_processed_total").increment(report.processed as u64);
        metrics::counter!("outbox_retried_total").increment(report.retried as u64);
        metrics::counter!("outbox_failed_total").increment(report.failed as u64);
        record_duration(self.name(), started);
        Ok(report)
    }

    /// Attempts one delivery and returns the event as it should be stored.
    async fn deliver(&self, event: &OutboxEvent, now: DateTime<Utc>) -> OutboxEvent {
        let message = match event.decode() {
            Ok(message) => message,
            Err(e) => return event.mark_failed(e.to_string(), now),
        };

        let result = match &message {
            OutboxMessage::OrderDelivered(payload) => {
                self.erp.export_order(payload.order_id, &payload.items).await
            }
        };

        match result {
            Ok(()) => event.mark_processed(now),
            Err(e) if e.is_permanent() => event.mark_failed(e.to_string(), now),
            Err(e) => event.after_transient_failure(e.to_string(), self.retry_budget, now),
        }
    }

    /// Stores `updated` if the event is still as it was listed and counts
    /// the outcome.
    async fn record(&self, listed: &OutboxEvent, updated: OutboxEvent, report: &mut OutboxReport) {
        let event_id = listed.id;
        let listed_retries = listed.retry_count;
        let to_save = updated.clone();
        let saved = self
            .store
            .transaction(move |uow| Box::pin(save_if_unchanged(uow, listed_retries, to_save)))
            .await;

        match saved {
            Ok(true) if updated.is_processed() => report.processed += 1,
            Ok(true) if updated.is_failed() => {
                report.failed += 1;
                tracing::error!(%event_id, event_type = %listed.event_type, error = ?updated.error, "Outbox event failed permanently");
            }
            Ok(true) => {
                report.retried += 1;
                tracing::warn!(%event_id, retry_count = updated.retry_count, error = ?updated.error, "Outbox delivery will be retried");
            }
            Ok(false) => {
                report.skipped += 1;
                tracing::info!(%event_id, "Outbox event changed by another dispatcher, skipping");
            }
            Err(e) => {
                tracing::error!(%event_id, error = %e, "Failed to record outbox delivery");
            }
        }
    }
}

/// Saves `updated` unless the stored event was resolved or retried since it
/// was listed with `listed_retries` retries.
async fn save_if_unchanged(
    uow: &mut dyn UnitOfWork,
    listed_retries: u32,
    updated: OutboxEvent,
) -> store::Result<bool> {
    let Some(current) = uow.outbox().find_by_id(updated.id).await? else {
        return Ok(false);
    };
    if current.is_processed() || current.is_failed() || current.retry_count != listed_retries {
        return Ok(false);
    }

    uow.outbox().save(&updated).await?;
    Ok(true)
}

#[async_trait]
impl<S, E> Job for OutboxDispatcher<S, E>
where
    S: Store,
    E: ErpExportGateway,
{
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn run(&self) -> Result<serde_json::Value> {
        let report = self.execute().await?;
        Ok(serde_json::to_value(report)?)
    }
}
