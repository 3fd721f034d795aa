use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use vigil_core::constants::DOWNLOAD_FAILED;
use vigil_core::{AntivirusConfig, AppError, ErrorMetadata, ScanRecord, ScanStats, Upload};
use vigil_db::{ScanRecordStore, UploadStore};
use vigil_storage::{open_reader, Storage};

use crate::clamav::{ClamAvError, ClamAvServicesPool, VersionTracker};
use crate::quarantine::QuarantineService;

const NO_SERVICE_AVAILABLE: &str = "No antivirus service available";

/// Registers new uploads for scanning and scans the ones that are due.
#[derive(Clone)]
pub struct BackgroundScanService {
    scan_records: Arc<dyn ScanRecordStore>,
    uploads: Arc<dyn UploadStore>,
    storage: Arc<dyn Storage>,
    pool: Arc<ClamAvServicesPool>,
    versions: Arc<VersionTracker>,
    quarantine: Arc<QuarantineService>,
    config: AntivirusConfig,
}

impl BackgroundScanService {
    pub fn new(
        scan_records: Arc<dyn ScanRecordStore>,
        uploads: Arc<dyn UploadStore>,
        storage: Arc<dyn Storage>,
        pool: Arc<ClamAvServicesPool>,
        versions: Arc<VersionTracker>,
        quarantine: Arc<QuarantineService>,
        config: AntivirusConfig,
    ) -> Self {
        Self {
            scan_records,
            uploads,
            storage,
            pool,
            versions,
            quarantine,
            config,
        }
    }

    /// Creates pending records for up to `limit` untracked uploads.
    #[tracing::instrument(skip(self))]
    pub async fn queue_batch(&self, limit: i64) -> Result<usize, AppError> {
        let upload_ids = self
            .scan_records
            .untracked_upload_ids(limit, self.config.system_user_id)
            .await?;
        if upload_ids.is_empty() {
            return Ok(0);
        }

        let next_scan_at = Utc::now() + self.config.initial_scan_delay();
        let created = self
            .scan_records
            .create_pending(&upload_ids, next_scan_at)
            .await?;

        tracing::info!(candidates = upload_ids.len(), created, "Uploads queued for scanning");
        Ok(created as usize)
    }

    /// Scans up to `limit` due records. Returns the number of records processed.
    ///
    /// Nothing is selected while every daemon is offline. A failure on one record is
    /// logged and never aborts the batch.
    #[tracing::instrument(skip(self))]
    pub async fn scan_batch(&self, limit: i64) -> Result<usize, AppError> {
        if self.pool.all_offline().await {
            tracing::warn!("Skipping scan batch, no antivirus daemon online");
            return Ok(0);
        }

        let current_version = self.versions.current_database_version().await;
        let records = self
            .scan_records
            .due_records(limit, current_version, Utc::now())
            .await?;
        if records.is_empty() {
            return Ok(0);
        }

        let upload_ids: Vec<i64> = records.iter().map(|r| r.upload_id).collect();
        let uploads: HashMap<i64, Upload> = self
            .uploads
            .find_uploads(&upload_ids)
            .await?
            .into_iter()
            .map(|upload| (upload.id, upload))
            .collect();

        let mut processed = 0;
        let mut found = 0;
        for mut record in records {
            let Some(upload) = uploads.get(&record.upload_id) else {
                tracing::debug!(upload_id = record.upload_id, "Skipping record of deleted upload");
                continue;
            };

            match self.scan_record(&mut record, upload, current_version).await {
                Ok(infected) => {
                    processed += 1;
                    if infected {
                        found += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        error_code = e.error_code(),
                        upload_id = upload.id,
                        "Failed to scan upload"
                    );
                }
            }
        }

        tracing::info!(processed, found, current_version = ?current_version, "Scan batch completed");
        Ok(processed)
    }

    /// Scans one upload and folds the verdict into `record`. Returns whether it was infected.
    async fn scan_record(
        &self,
        record: &mut ScanRecord,
        upload: &Upload,
        current_version: Option<i64>,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let retry = self.config.failure_retry_delay();

        let Some(conn) = self.pool.find_online().await else {
            record.mark_scan_failed(NO_SERVICE_AVAILABLE, now, retry);
            self.scan_records.save_scan_result(record).await?;
            return Ok(false);
        };

        let reader = match open_reader(self.storage.as_ref(), &upload.storage_key).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(error = %e, upload_id = upload.id, "Failed to download upload for scanning");
                conn.close().await;
                record.mark_scan_failed(DOWNLOAD_FAILED, now, retry);
                self.scan_records.save_scan_result(record).await?;
                return Ok(false);
            }
        };

        let outcome = self.pool.client().stream_scan(conn, reader).await;
        let now = Utc::now();
        let infected = match outcome {
            Ok(outcome) if outcome.error => {
                tracing::warn!(upload_id = upload.id, scan_result = %outcome.message, "Antivirus daemon reported an error");
                record.mark_daemon_error(&outcome.message, now, retry);
                false
            }
            Ok(outcome) => {
                // Records saved as up to date are never selected again, so a failed
                // quarantine leaves the record due after the retry delay.
                if outcome.found {
                    if let Err(e) = self.quarantine.quarantine(upload, &outcome.message).await {
                        record.mark_scan_failed(&outcome.message, now, retry);
                        self.scan_records.save_scan_result(record).await?;
                        return Err(e);
                    }
                }
                let version = current_version
                    .or(record.virus_database_version_used)
                    .unwrap_or(0);
                record.mark_as_scanned_with(&outcome.message, version, upload.created_at, now);
                outcome.found
            }
            Err(ClamAvError::Source(e)) => {
                tracing::warn!(error = %e, upload_id = upload.id, "Upload stream failed during scan");
                record.mark_scan_failed(DOWNLOAD_FAILED, now, retry);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, upload_id = upload.id, "Antivirus scan failed");
                record.mark_scan_failed(&e.to_string(), now, retry);
                false
            }
        };

        self.scan_records.save_scan_result(record).await?;
        Ok(infected)
    }

    pub async fn stats(&self) -> Result<ScanStats, AppError> {
        self.scan_records.stats().await
    }

    /// Deletes records whose upload no longer exists.
    #[tracing::instrument(skip(self))]
    pub async fn remove_orphaned(&self) -> Result<u64, AppError> {
        let removed = self.scan_records.remove_orphaned().await?;
        if removed > 0 {
            tracing::info!(removed, "Removed orphaned scan records");
        }
        Ok(removed)
    }

    /// Forgets the record of one upload so the next queue pass starts it over.
    #[tracing::instrument(skip(self))]
    pub async fn forget(&self, upload_id: i64) -> Result<bool, AppError> {
        let removed = self.scan_records.delete_for_upload(upload_id).await?;
        if removed {
            tracing::info!(upload_id, "Removed scan record");
        }
        Ok(removed)
    }
}
