//! Test fixtures: uploads, documents and payloads.

use chrono::{DateTime, Duration, Utc};
use vigil_core::{ReferencingDocument, Upload};

/// The EICAR test string; real daemons flag it, the fake daemon does whatever it is told.
pub const EICAR: &[u8] = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

pub fn upload(id: i64, created_at: DateTime<Utc>) -> Upload {
    Upload {
        id,
        user_id: 42,
        original_filename: format!("report{id}.pdf"),
        sha1: format!("{id:040x}"),
        extension: Some("pdf".to_string()),
        filesize: 1024,
        storage_key: format!("original/1X/{id}.pdf"),
        created_at,
    }
}

/// An upload created `days` ago.
pub fn upload_aged(id: i64, days: i64) -> Upload {
    upload(id, Utc::now() - Duration::days(days))
}

pub fn document(id: i64, user_id: i64, topic_id: i64, raw: &str) -> ReferencingDocument {
    ReferencingDocument {
        id,
        user_id,
        topic_id: Some(topic_id),
        raw: raw.to_string(),
        locked_by_id: None,
    }
}

/// A document body linking `upload` the way the editor does.
pub fn linking_raw(upload: &Upload) -> String {
    format!(
        "Here is the file: [{}|attachment](upload://{})",
        upload.original_filename,
        upload.short_link()
    )
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
