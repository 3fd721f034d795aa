//! Store traits
//!
//! The scanning services depend only on these traits so they can run against Postgres in
//! production and in-memory stores in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use vigil_core::{AppError, ScanRecord, ScanStats, Upload};

/// Scan bookkeeping persistence.
#[async_trait]
pub trait ScanRecordStore: Send + Sync {
    /// Uploads without a scan record whose references are not exclusively documents
    /// authored by `system_user_id`. Unreferenced uploads qualify.
    async fn untracked_upload_ids(
        &self,
        limit: i64,
        system_user_id: i64,
    ) -> Result<Vec<i64>, AppError>;

    /// Creates pending records; uploads that already have one are skipped.
    /// Returns the number of records actually created.
    async fn create_pending(
        &self,
        upload_ids: &[i64],
        next_scan_at: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Non-quarantined records whose `next_scan_at` has passed, or which have no schedule
    /// and were scanned with an older signature database than `current_version`.
    /// Version-driven selection is skipped when `current_version` is `None`.
    async fn due_records(
        &self,
        limit: i64,
        current_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScanRecord>, AppError>;

    /// Persists the scan bookkeeping columns. Never touches `quarantined`.
    async fn save_scan_result(&self, record: &ScanRecord) -> Result<(), AppError>;

    /// Quarantined records that have no moderation case yet.
    async fn quarantined_without_case(&self, limit: i64) -> Result<Vec<ScanRecord>, AppError>;

    /// Deletes records whose upload no longer exists.
    async fn remove_orphaned(&self) -> Result<u64, AppError>;

    async fn delete_for_upload(&self, upload_id: i64) -> Result<bool, AppError>;

    async fn stats(&self) -> Result<ScanStats, AppError>;
}

/// Read access to the host's uploads.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn find_upload(&self, upload_id: i64) -> Result<Option<Upload>, AppError>;

    async fn find_uploads(&self, upload_ids: &[i64]) -> Result<Vec<Upload>, AppError>;
}

/// Everything needed to quarantine or flag one upload.
#[derive(Debug, Clone)]
pub struct QuarantineRequest {
    pub upload: Upload,
    pub scan_message: String,
    /// Text that replaces references to the upload in documents
    pub placeholder: String,
    pub system_user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineOutcome {
    /// Another invocation got there first; nothing was changed.
    AlreadyQuarantined,
    /// `case_id` is `None` when flagging was not requested.
    Quarantined { case_id: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    AlreadyFlagged,
    Flagged { case_id: i64 },
}

/// Atomic quarantine transitions.
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    /// Sets `quarantined` (creating the record if missing) and, when `flag` is true,
    /// flags the upload, all in one transaction. Only the invocation that flips the flag
    /// performs side effects.
    async fn quarantine(
        &self,
        request: &QuarantineRequest,
        flag: bool,
    ) -> Result<QuarantineOutcome, AppError>;

    /// Redacts and locks referencing documents, opens a moderation case with one
    /// malicious-file score and notifies the uploader. No-op when a case exists.
    async fn flag(&self, request: &QuarantineRequest) -> Result<FlagOutcome, AppError>;

    async fn has_case(&self, upload_id: i64) -> Result<bool, AppError>;
}

/// Small key/value store for cross-process status (cached versions, availability).
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError>;
}

/// Typed access on top of [`StatusStore`].
#[async_trait]
pub trait StatusStoreExt {
    async fn get_typed<T>(&self, key: &str) -> Result<Option<T>, AppError>
    where
        T: DeserializeOwned + Send;

    async fn set_typed<T>(&self, key: &str, value: &T) -> Result<(), AppError>
    where
        T: Serialize + Sync;
}

#[async_trait]
impl<S: StatusStore + ?Sized> StatusStoreExt for S {
    async fn get_typed<T>(&self, key: &str) -> Result<Option<T>, AppError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_typed<T>(&self, key: &str, value: &T) -> Result<(), AppError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}
