//! Periodic background jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Checked once when scheduling.
    fn should_enable(&self) -> bool;

    /// Run once. Returning `false` unschedules the job.
    async fn run(&self, cancel: &CancellationToken) -> bool;
}

/// Spawn one task per enabled job. Each runs immediately, then every
/// `interval`, until `cancel` fires or the job asks to stop.
pub fn schedule_jobs(cancel: &CancellationToken, jobs: Vec<Arc<dyn Job>>) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .filter(|job| {
            let enabled = job.should_enable();
            tracing::info!(job = job.id(), enabled = enabled, "scheduling job");
            enabled
        })
        .map(|job| tokio::spawn(run_job(job, cancel.clone())))
        .collect()
}

async fn run_job(job: Arc<dyn Job>, cancel: CancellationToken) {
    let mut ticks = tokio::time::interval(job.interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticks.tick() => {}
        }
        if !job.run(&cancel).await {
            tracing::info!(job = job.id(), "job asked to stop, unscheduling");
            return;
        }
    }
}
