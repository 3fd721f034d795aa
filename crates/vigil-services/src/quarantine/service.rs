use std::sync::Arc;
use vigil_core::{AntivirusConfig, AppError, ScanRecord, Upload};
use vigil_db::{
    FlagOutcome, QuarantineOutcome, QuarantineRequest, QuarantineStore, ScanRecordStore,
    UploadStore,
};

/// Puts infected uploads aside and raises them for moderation.
#[derive(Clone)]
pub struct QuarantineService {
    store: Arc<dyn QuarantineStore>,
    scan_records: Arc<dyn ScanRecordStore>,
    uploads: Arc<dyn UploadStore>,
    config: AntivirusConfig,
}

impl QuarantineService {
    pub fn new(
        store: Arc<dyn QuarantineStore>,
        scan_records: Arc<dyn ScanRecordStore>,
        uploads: Arc<dyn UploadStore>,
        config: AntivirusConfig,
    ) -> Self {
        Self {
            store,
            scan_records,
            uploads,
            config,
        }
    }

    fn request(&self, upload: &Upload, scan_message: &str) -> QuarantineRequest {
        QuarantineRequest {
            upload: upload.clone(),
            scan_message: scan_message.to_string(),
            placeholder: self.config.quarantine_placeholder.clone(),
            system_user_id: self.config.system_user_id,
        }
    }

    /// Marks the upload quarantined and, when flagging is enabled, flags it in the same
    /// transaction. Repeated calls for the same upload have no further effect.
    #[tracing::instrument(skip(self, upload), fields(upload.id = upload.id))]
    pub async fn quarantine(
        &self,
        upload: &Upload,
        scan_message: &str,
    ) -> Result<QuarantineOutcome, AppError> {
        let request = self.request(upload, scan_message);
        let outcome = self
            .store
            .quarantine(&request, self.config.flag_malicious_uploads)
            .await?;

        match outcome {
            QuarantineOutcome::Quarantined { case_id } => {
                tracing::warn!(
                    upload_id = upload.id,
                    case_id = ?case_id,
                    scan_result = %scan_message,
                    "Upload quarantined"
                );
            }
            QuarantineOutcome::AlreadyQuarantined => {
                tracing::debug!(upload_id = upload.id, "Upload already quarantined");
            }
        }
        Ok(outcome)
    }

    /// Flags a quarantined upload that has no moderation case yet.
    /// Returns whether a case was opened.
    pub async fn flag_if_needed(&self, record: &ScanRecord) -> Result<bool, AppError> {
        if !record.quarantined || !self.config.flag_malicious_uploads {
            return Ok(false);
        }
        if self.store.has_case(record.upload_id).await? {
            return Ok(false);
        }

        let Some(upload) = self.uploads.find_upload(record.upload_id).await? else {
            tracing::debug!(upload_id = record.upload_id, "Quarantined upload no longer exists");
            return Ok(false);
        };

        let message = record.scan_result.clone().unwrap_or_default();
        match self.store.flag(&self.request(&upload, &message)).await? {
            FlagOutcome::Flagged { case_id } => {
                tracing::info!(upload_id = upload.id, case_id, "Quarantined upload flagged");
                Ok(true)
            }
            FlagOutcome::AlreadyFlagged => Ok(false),
        }
    }

    /// Sweeps quarantined records without a case. Returns the number of cases opened.
    #[tracing::instrument(skip(self))]
    pub async fn flag_pending(&self, limit: i64) -> Result<usize, AppError> {
        if !self.config.flag_malicious_uploads {
            return Ok(0);
        }

        let records = self.scan_records.quarantined_without_case(limit).await?;
        let mut flagged = 0;
        for record in &records {
            match self.flag_if_needed(record).await {
                Ok(true) => flagged += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, upload_id = record.upload_id, "Failed to flag quarantined upload");
                }
            }
        }

        tracing::info!(candidates = records.len(), flagged, "Flag sweep completed");
        Ok(flagged)
    }
}
