use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded file as owned by the host document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Upload {
    pub id: i64,
    pub user_id: i64,
    pub original_filename: String,
    pub sha1: String,
    pub extension: Option<String>,
    pub filesize: i64,
    /// Key under which the bytes live in the external store.
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl Upload {
    /// Token used by `upload://` references in document bodies.
    pub fn short_link(&self) -> String {
        match self.extension.as_deref().filter(|ext| !ext.is_empty()) {
            Some(ext) => format!("{}.{}", self.sha1, ext),
            None => self.sha1.clone(),
        }
    }

    pub fn is_image(&self) -> bool {
        const IMAGE_EXTENSIONS: &[&str] = &[
            "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "svg", "ico", "heic",
            "heif", "avif",
        ];
        self.extension
            .as_deref()
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// What an incoming upload is for, as far as live scanning cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Attachment,
    Image,
    /// Generated data exports; never scanned.
    Export,
}

/// A document (post) whose body references an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReferencingDocument {
    pub id: i64,
    pub user_id: i64,
    pub topic_id: Option<i64>,
    pub raw: String,
    pub locked_by_id: Option<i64>,
}
