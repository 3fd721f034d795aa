//! What flagging an upload does to its referencing documents and the moderation queue.
//!
//! Stores apply a [`FlagPlan`] inside their own transaction; building it is pure.

use crate::error::AppError;
use crate::models::{QuarantinePayload, ReferencingDocument, Upload};
use crate::redaction::redact_upload_references;

/// Rewrite of one referencing document. `raw` is `None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRedaction {
    pub document_id: i64,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagPlan {
    /// Every referencing document is locked, redacted or not.
    pub redactions: Vec<DocumentRedaction>,
    /// Topic of the last referencing document.
    pub topic_id: Option<i64>,
    pub payload: QuarantinePayload,
}

impl FlagPlan {
    pub fn build(
        upload: &Upload,
        uploader_username: &str,
        documents: &[ReferencingDocument],
        scan_message: &str,
        placeholder: &str,
    ) -> Result<Self, AppError> {
        let short_link = upload.short_link();

        let redactions = documents
            .iter()
            .map(|doc| {
                redact_upload_references(&doc.raw, &short_link, placeholder)
                    .map(|raw| DocumentRedaction {
                        document_id: doc.id,
                        raw,
                    })
                    .map_err(|e| AppError::Internal(format!("Invalid redaction pattern: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let last = documents.last();

        Ok(Self {
            topic_id: last.and_then(|doc| doc.topic_id),
            payload: QuarantinePayload {
                scan_message: scan_message.to_string(),
                original_filename: upload.original_filename.clone(),
                post_raw: last.map(|doc| doc.raw.clone()),
                uploaded_by: uploader_username.to_string(),
                uploaded_to: documents.iter().map(|doc| doc.id).collect(),
            },
            redactions,
        })
    }
}
