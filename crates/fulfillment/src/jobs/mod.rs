//! Periodic reconciliation jobs.
//!
//! Each job is an explicit value with an `execute()` entry point. Every entry
//! point is idempotent and may run concurrently with itself: all decisions are
//! re-checked inside the per-item transaction.

mod order_timeout;
mod outbox;
mod payment_timeout;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Result;

pub use order_timeout::{OrderPaymentTimeoutJob, OrderSweepReport};
pub use outbox::{OutboxDispatcher, OutboxReport};
pub use payment_timeout::{PaymentSweepReport, PaymentTimeoutJob};

/// Timing and batch settings for the background jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub payment_sweep_interval: Duration,
    /// Age after which a `PENDING` payment is expired.
    pub payment_timeout: Duration,
    pub order_sweep_interval: Duration,
    /// Time an order may sit in `PAYMENT` without a pending payment.
    pub order_payment_timeout: Duration,
    pub outbox_interval: Duration,
    pub outbox_retry_budget: u32,
    pub outbox_batch_size: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            payment_sweep_interval: Duration::from_secs(60),
            payment_timeout: Duration::from_secs(10 * 60),
            order_sweep_interval: Duration::from_secs(5 * 60),
            order_payment_timeout: Duration::from_secs(15 * 60),
            outbox_interval: Duration::from_secs(60),
            outbox_retry_budget: domain::DEFAULT_RETRY_BUDGET,
            outbox_batch_size: 50,
        }
    }
}

/// A job the scheduler can run by name.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one pass and returns its report as JSON.
    async fn run(&self) -> Result<serde_json::Value>;
}

/// The instant `age` before `now`.
fn horizon(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn record_duration(job: &'static str, started: std::time::Instant) {
    metrics::histogram!("job_duration_seconds", "job" => job).record(started.elapsed().as_secs_f64());
}
