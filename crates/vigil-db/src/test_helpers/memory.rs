use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use vigil_core::constants::MALICIOUS_FILE_REASON;
use vigil_core::{
    AppError, FlagPlan, ModerationCase, ReferencingDocument, ScanRecord, ScanStats, Upload,
};

use crate::db::traits::{
    FlagOutcome, QuarantineOutcome, QuarantineRequest, QuarantineStore, ScanRecordStore,
    StatusStore, UploadStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub case_id: i64,
    pub user_id: i64,
    pub score_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: i64,
    pub notification_type: String,
    pub filename: String,
}

#[derive(Default)]
struct State {
    users: HashMap<i64, String>,
    uploads: HashMap<i64, Upload>,
    documents: HashMap<i64, ReferencingDocument>,
    references: Vec<(i64, i64)>,
    records: HashMap<i64, ScanRecord>,
    cases: Vec<ModerationCase>,
    scores: Vec<Score>,
    notifications: Vec<Notification>,
    status: HashMap<String, serde_json::Value>,
    next_id: i64,
    fail_status_writes: bool,
    fail_quarantines: bool,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_case(&self, upload_id: i64) -> bool {
        self.cases.iter().any(|case| case.upload_id == upload_id)
    }

    fn flag(&mut self, request: &QuarantineRequest) -> Result<FlagOutcome, AppError> {
        let upload = &request.upload;
        if self.has_case(upload.id) {
            return Ok(FlagOutcome::AlreadyFlagged);
        }

        let username = self
            .users
            .get(&upload.user_id)
            .cloned()
            .unwrap_or_else(|| format!("user{}", upload.user_id));

        let mut doc_ids: Vec<i64> = self
            .references
            .iter()
            .filter(|(up, _)| *up == upload.id)
            .map(|(_, doc)| *doc)
            .collect();
        doc_ids.sort_unstable();
        let documents: Vec<ReferencingDocument> = doc_ids
            .iter()
            .filter_map(|id| self.documents.get(id).cloned())
            .collect();

        let plan = FlagPlan::build(
            upload,
            &username,
            &documents,
            &request.scan_message,
            &request.placeholder,
        )?;

        for redaction in &plan.redactions {
            if let Some(doc) = self.documents.get_mut(&redaction.document_id) {
                if let Some(raw) = &redaction.raw {
                    doc.raw = raw.clone();
                }
                doc.locked_by_id = Some(request.system_user_id);
            }
        }

        let case_id = self.next_id();
        self.cases.push(ModerationCase {
            id: case_id,
            upload_id: upload.id,
            topic_id: plan.topic_id,
            created_by_id: request.system_user_id,
            target_created_by_id: upload.user_id,
            status: ModerationCase::STATUS_PENDING.to_string(),
            payload: serde_json::to_value(&plan.payload)?,
            created_at: Utc::now(),
        });
        self.scores.push(Score {
            case_id,
            user_id: request.system_user_id,
            score_type: MALICIOUS_FILE_REASON.to_string(),
        });
        self.notifications.push(Notification {
            user_id: upload.user_id,
            notification_type: MALICIOUS_FILE_REASON.to_string(),
            filename: upload.original_filename.clone(),
        });

        Ok(FlagOutcome::Flagged { case_id })
    }
}

/// Mock store for testing without a database
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: i64, username: &str) {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(id, username.to_string());
    }

    pub fn add_upload(&self, upload: Upload) {
        self.state.lock().unwrap().uploads.insert(upload.id, upload);
    }

    pub fn remove_upload(&self, upload_id: i64) {
        self.state.lock().unwrap().uploads.remove(&upload_id);
    }

    /// Adds a document referencing `upload_id`.
    pub fn add_document(&self, upload_id: i64, document: ReferencingDocument) {
        let mut state = self.state.lock().unwrap();
        state.references.push((upload_id, document.id));
        state.documents.insert(document.id, document);
    }

    pub fn document(&self, id: i64) -> Option<ReferencingDocument> {
        self.state.lock().unwrap().documents.get(&id).cloned()
    }

    pub fn insert_record(&self, record: ScanRecord) -> ScanRecord {
        let mut state = self.state.lock().unwrap();
        let mut record = record;
        if record.id == 0 {
            record.id = state.next_id();
        }
        state.records.insert(record.upload_id, record.clone());
        record
    }

    pub fn record(&self, upload_id: i64) -> Option<ScanRecord> {
        self.state.lock().unwrap().records.get(&upload_id).cloned()
    }

    pub fn records(&self) -> Vec<ScanRecord> {
        let mut records: Vec<_> = self.state.lock().unwrap().records.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn cases(&self) -> Vec<ModerationCase> {
        self.state.lock().unwrap().cases.clone()
    }

    pub fn scores(&self) -> Vec<Score> {
        self.state.lock().unwrap().scores.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn status_value(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().status.get(key).cloned()
    }

    /// Makes every subsequent `StatusStore::set` fail.
    pub fn fail_status_writes(&self) {
        self.state.lock().unwrap().fail_status_writes = true;
    }

    /// While set, `QuarantineStore::quarantine` fails without changing anything, like a
    /// rolled-back transaction.
    pub fn set_fail_quarantines(&self, fail: bool) {
        self.state.lock().unwrap().fail_quarantines = fail;
    }
}

#[async_trait]
impl ScanRecordStore for InMemoryStore {
    async fn untracked_upload_ids(
        &self,
        limit: i64,
        system_user_id: i64,
    ) -> Result<Vec<i64>, AppError> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<i64> = state
            .uploads
            .keys()
            .copied()
            .filter(|id| !state.records.contains_key(id))
            .filter(|id| {
                let authors: Vec<i64> = state
                    .references
                    .iter()
                    .filter(|(up, _)| up == id)
                    .filter_map(|(_, doc)| state.documents.get(doc).map(|d| d.user_id))
                    .collect();
                authors.is_empty() || authors.iter().any(|author| *author != system_user_id)
            })
            .collect();
        ids.sort_unstable();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }

    async fn create_pending(
        &self,
        upload_ids: &[i64],
        next_scan_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut created = 0;
        for upload_id in upload_ids {
            if state.records.contains_key(upload_id) {
                continue;
            }
            let id = state.next_id();
            let now = Utc::now();
            let mut record = ScanRecord::pending(*upload_id, now, Duration::zero());
            record.id = id;
            record.next_scan_at = Some(next_scan_at);
            state.records.insert(*upload_id, record);
            created += 1;
        }
        Ok(created)
    }

    async fn due_records(
        &self,
        limit: i64,
        current_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScanRecord>, AppError> {
        let mut due: Vec<ScanRecord> = self
            .records()
            .into_iter()
            .filter(|r| r.is_due(current_version, now))
            .collect();
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn save_scan_result(&self, record: &ScanRecord) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(stored) = state.records.get_mut(&record.upload_id) {
            stored.scans = record.scans;
            stored.next_scan_at = record.next_scan_at;
            stored.virus_database_version_used = record.virus_database_version_used;
            stored.last_scan_failed = record.last_scan_failed;
            stored.scan_result = record.scan_result.clone();
            stored.updated_at = record.updated_at;
        }
        Ok(())
    }

    async fn quarantined_without_case(&self, limit: i64) -> Result<Vec<ScanRecord>, AppError> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<ScanRecord> = state
            .records
            .values()
            .filter(|r| r.quarantined && !state.has_case(r.upload_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn remove_orphaned(&self) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        let uploads: Vec<i64> = state.uploads.keys().copied().collect();
        state.records.retain(|upload_id, _| uploads.contains(upload_id));
        Ok((before - state.records.len()) as u64)
    }

    async fn delete_for_upload(&self, upload_id: i64) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .remove(&upload_id)
            .is_some())
    }

    async fn stats(&self) -> Result<ScanStats, AppError> {
        let state = self.state.lock().unwrap();
        let day_ago = Utc::now() - Duration::hours(24);
        Ok(ScanStats {
            scans: state.records.values().map(|r| r.scans as i64).sum(),
            recently_scanned: state
                .records
                .values()
                .filter(|r| r.scans > 0 && r.updated_at >= day_ago)
                .count() as i64,
            quarantined: state.records.values().filter(|r| r.quarantined).count() as i64,
            found: state.cases.len() as i64,
        })
    }
}

#[async_trait]
impl UploadStore for InMemoryStore {
    async fn find_upload(&self, upload_id: i64) -> Result<Option<Upload>, AppError> {
        Ok(self.state.lock().unwrap().uploads.get(&upload_id).cloned())
    }

    async fn find_uploads(&self, upload_ids: &[i64]) -> Result<Vec<Upload>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(upload_ids
            .iter()
            .filter_map(|id| state.uploads.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl QuarantineStore for InMemoryStore {
    async fn quarantine(
        &self,
        request: &QuarantineRequest,
        flag: bool,
    ) -> Result<QuarantineOutcome, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_quarantines {
            return Err(AppError::Internal("simulated quarantine failure".to_string()));
        }
        let upload_id = request.upload.id;

        if !state.records.contains_key(&upload_id) {
            let id = state.next_id();
            let mut record = ScanRecord::pending(upload_id, Utc::now(), Duration::zero());
            record.id = id;
            record.next_scan_at = None;
            state.records.insert(upload_id, record);
        }

        let already = state
            .records
            .get(&upload_id)
            .map(|r| r.quarantined)
            .unwrap_or(false);
        if already {
            return Ok(QuarantineOutcome::AlreadyQuarantined);
        }

        let case_id = if flag {
            match state.flag(request)? {
                FlagOutcome::Flagged { case_id } => Some(case_id),
                FlagOutcome::AlreadyFlagged => None,
            }
        } else {
            None
        };

        if let Some(record) = state.records.get_mut(&upload_id) {
            record.quarantined = true;
        }

        Ok(QuarantineOutcome::Quarantined { case_id })
    }

    async fn flag(&self, request: &QuarantineRequest) -> Result<FlagOutcome, AppError> {
        self.state.lock().unwrap().flag(request)
    }

    async fn has_case(&self, upload_id: i64) -> Result<bool, AppError> {
        Ok(self.state.lock().unwrap().has_case(upload_id))
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        Ok(self.status_value(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status_writes {
            return Err(AppError::Internal("status store unavailable".to_string()));
        }
        state.status.insert(key.to_string(), value);
        Ok(())
    }
}
