//! The jobs the scheduler runs and what each one does.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use vigil_core::{AntivirusConfig, AppError};
use vigil_services::{BackgroundScanService, QuarantineService, VersionTracker};

const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Register untracked uploads
    Queue,
    /// Scan due records
    Scan,
    /// Refetch daemon versions
    RefreshVersion,
    /// Open cases for quarantined uploads that have none
    FlagQuarantined,
    /// Delete records of deleted uploads
    RemoveOrphans,
}

impl Job {
    pub const ALL: [Job; 5] = [
        Job::Queue,
        Job::Scan,
        Job::RefreshVersion,
        Job::FlagQuarantined,
        Job::RemoveOrphans,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Job::Queue => "queue",
            Job::Scan => "scan",
            Job::RefreshVersion => "refresh_version",
            Job::FlagQuarantined => "flag_quarantined",
            Job::RemoveOrphans => "remove_orphans",
        }
    }

    /// Cadence of the job, between one second and one year.
    pub fn interval(&self, config: &AntivirusConfig) -> Duration {
        let secs = match self {
            Job::Queue => config.queue_interval_secs,
            Job::Scan => config.scan_interval_secs,
            Job::RefreshVersion => config.version_ttl().as_secs(),
            Job::FlagQuarantined => config.flag_interval_secs,
            Job::RemoveOrphans => config.orphan_interval_secs,
        };
        Duration::from_secs(secs.clamp(1, MAX_INTERVAL_SECS))
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs one job to completion. Returns how many items it handled.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: Job) -> Result<usize, AppError>;
}

/// The production job set, backed by the scanning services.
pub struct ScanJobs {
    scanner: Arc<BackgroundScanService>,
    quarantine: Arc<QuarantineService>,
    versions: Arc<VersionTracker>,
    config: AntivirusConfig,
}

impl ScanJobs {
    pub fn new(
        scanner: Arc<BackgroundScanService>,
        quarantine: Arc<QuarantineService>,
        versions: Arc<VersionTracker>,
        config: AntivirusConfig,
    ) -> Self {
        Self {
            scanner,
            quarantine,
            versions,
            config,
        }
    }

    fn active(&self) -> bool {
        self.config.enabled && self.config.correctly_configured()
    }
}

#[async_trait]
impl JobRunner for ScanJobs {
    #[tracing::instrument(skip(self), fields(job = %job))]
    async fn run(&self, job: Job) -> Result<usize, AppError> {
        // Orphan removal keeps the table tidy even while scanning is switched off
        if !self.active() && job != Job::RemoveOrphans {
            tracing::debug!("Antivirus disabled, skipping job");
            return Ok(0);
        }

        match job {
            Job::Queue => {
                self.scanner
                    .queue_batch(self.config.queue_batch_size)
                    .await
            }
            Job::Scan => self.scanner.scan_batch(self.config.scan_batch_size).await,
            Job::RefreshVersion => Ok(self.versions.refresh().await.len()),
            Job::FlagQuarantined => {
                self.quarantine
                    .flag_pending(self.config.flag_batch_size)
                    .await
            }
            Job::RemoveOrphans => Ok(self.scanner.remove_orphaned().await? as usize),
        }
    }
}
