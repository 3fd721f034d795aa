use async_trait::async_trait;
use sqlx::PgPool;
use vigil_core::{AppError, Upload};

use super::traits::UploadStore;

/// Read-only view over the host's `uploads` table
#[derive(Clone)]
pub struct PgUploadRepository {
    pool: PgPool,
}

impl PgUploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadStore for PgUploadRepository {
    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.operation = "select"))]
    async fn find_upload(&self, upload_id: i64) -> Result<Option<Upload>, AppError> {
        let upload = sqlx::query_as::<_, Upload>(
            r#"
            SELECT id, user_id, original_filename, sha1, extension, filesize, storage_key, created_at
            FROM uploads
            WHERE id = $1
            "#,
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(upload)
    }

    #[tracing::instrument(skip(self, upload_ids), fields(db.table = "uploads", db.operation = "select", count = upload_ids.len()))]
    async fn find_uploads(&self, upload_ids: &[i64]) -> Result<Vec<Upload>, AppError> {
        if upload_ids.is_empty() {
            return Ok(Vec::new());
        }

        let uploads = sqlx::query_as::<_, Upload>(
            r#"
            SELECT id, user_id, original_filename, sha1, extension, filesize, storage_key, created_at
            FROM uploads
            WHERE id = ANY($1)
            "#,
        )
        .bind(upload_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(uploads)
    }
}
