use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use vigil_core::{AntivirusConfig, ErrorMetadata, LogLevel};

use crate::jobs::{Job, JobRunner};

/// Runs each job on its own timer. Different jobs may overlap; a job never overlaps
/// with itself because its loop awaits each run before the next tick.
pub struct JobScheduler {
    runner: Arc<dyn JobRunner>,
    schedule: Vec<(Job, Duration)>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobScheduler {
    /// Every job at its configured cadence.
    pub fn new(runner: Arc<dyn JobRunner>, config: &AntivirusConfig) -> Self {
        let schedule = Job::ALL
            .iter()
            .map(|job| (*job, job.interval(config)))
            .collect();
        Self::with_schedule(runner, schedule)
    }

    pub fn with_schedule(runner: Arc<dyn JobRunner>, schedule: Vec<(Job, Duration)>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            runner,
            schedule,
            shutdown_tx,
        }
    }

    /// Start all job loops. The first run of each job happens immediately.
    /// Returns a JoinHandle that completes once every loop has stopped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let loops: Vec<JoinHandle<()>> = self
                .schedule
                .iter()
                .map(|(job, every)| {
                    let runner = self.runner.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();
                    let (job, every) = (*job, *every);
                    tokio::spawn(async move {
                        let mut ticker = interval(every);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        loop {
                            tokio::select! {
                                _ = ticker.tick() => run_once(runner.as_ref(), job).await,
                                _ = shutdown_rx.changed() => break,
                            }
                        }
                    })
                })
                .collect();

            tracing::info!(jobs = loops.len(), "Job scheduler started");
            for handle in loops {
                let _ = handle.await;
            }
            tracing::info!("Job scheduler stopped");
        })
    }

    /// Signals every loop to stop after its current run.
    pub fn shutdown(&self) {
        tracing::info!("Initiating job scheduler shutdown");
        let _ = self.shutdown_tx.send(true);
    }
}

/// Runs `job` once, logging the outcome instead of returning it. Failures are logged at
/// the level their error reports.
pub async fn run_once(runner: &dyn JobRunner, job: Job) {
    let started = Instant::now();
    match runner.run(job).await {
        Ok(handled) => {
            tracing::info!(
                job = %job,
                handled,
                duration_ms = started.elapsed().as_millis() as u64,
                "Job completed"
            );
        }
        Err(e) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let (code, recoverable) = (e.error_code(), e.is_recoverable());
            match e.log_level() {
                LogLevel::Error => {
                    tracing::error!(job = %job, error = %e, error_code = code, recoverable, duration_ms, "Job failed")
                }
                LogLevel::Warn => {
                    tracing::warn!(job = %job, error = %e, error_code = code, recoverable, duration_ms, "Job failed")
                }
                LogLevel::Debug => {
                    tracing::debug!(job = %job, error = %e, error_code = code, recoverable, duration_ms, "Job failed")
                }
            }
        }
    }
}
