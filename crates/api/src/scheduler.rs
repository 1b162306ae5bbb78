//! Drives the background jobs on fixed intervals.

use std::sync::Arc;
use std::time::Duration;

use fulfillment::Job;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A job together with how often it runs.
#[derive(Clone)]
pub struct ScheduledJob {
    pub job: Arc<dyn Job>,
    pub interval: Duration,
}

/// Spawns one loop per job. The first run happens one interval after start.
///
/// Runs of the same job never overlap within a process; a slow run delays
/// the next tick instead of stacking up.
pub fn spawn(jobs: Vec<ScheduledJob>) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|scheduled| tokio::spawn(run_forever(scheduled)))
        .collect()
}

async fn run_forever(scheduled: ScheduledJob) {
    let ScheduledJob { job, interval } = scheduled;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    tracing::info!(job = job.name(), interval_secs = interval.as_secs(), "Job scheduled");
    loop {
        ticker.tick().await;
        match job.run().await {
            Ok(report) => tracing::debug!(job = job.name(), %report, "Job run finished"),
            Err(e) => tracing::error!(job = job.name(), error = %e, "Job run failed"),
        }
    }
}
