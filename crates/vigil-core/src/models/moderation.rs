use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload stored on a malicious-file moderation case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinePayload {
    pub scan_message: String,
    pub original_filename: String,
    /// Raw text of the last referencing document, before redaction
    pub post_raw: Option<String>,
    pub uploaded_by: String,
    /// Ids of the documents that were redacted
    pub uploaded_to: Vec<i64>,
}

/// Moderation case raised for a quarantined upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ModerationCase {
    pub id: i64,
    pub upload_id: i64,
    pub topic_id: Option<i64>,
    pub created_by_id: i64,
    pub target_created_by_id: i64,
    pub status: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ModerationCase {
    pub const STATUS_PENDING: &'static str = "pending";

    pub fn payload(&self) -> Result<QuarantinePayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
