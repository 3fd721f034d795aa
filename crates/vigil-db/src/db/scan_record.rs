use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use vigil_core::constants::MALICIOUS_FILE_REASON;
use vigil_core::{AppError, ScanRecord, ScanStats};

use super::traits::ScanRecordStore;

/// Postgres-backed scan records
#[derive(Clone)]
pub struct PgScanRecordRepository {
    pool: PgPool,
}

impl PgScanRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanRecordStore for PgScanRecordRepository {
    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.operation = "select"))]
    async fn untracked_upload_ids(
        &self,
        limit: i64,
        system_user_id: i64,
    ) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT u.id
            FROM uploads u
            LEFT JOIN scan_records sr ON sr.upload_id = u.id
            WHERE sr.id IS NULL
              AND (
                NOT EXISTS (
                    SELECT 1 FROM upload_references ur WHERE ur.upload_id = u.id
                )
                OR EXISTS (
                    SELECT 1
                    FROM upload_references ur
                    JOIN documents d ON d.id = ur.document_id
                    WHERE ur.upload_id = u.id AND d.user_id <> $2
                )
              )
            ORDER BY u.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(system_user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    #[tracing::instrument(skip(self, upload_ids), fields(db.table = "scan_records", db.operation = "insert", count = upload_ids.len()))]
    async fn create_pending(
        &self,
        upload_ids: &[i64],
        next_scan_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        if upload_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO scan_records (upload_id, next_scan_at, created_at, updated_at)
            SELECT id, $2, NOW(), NOW()
            FROM UNNEST($1::bigint[]) AS t(id)
            ON CONFLICT (upload_id) DO NOTHING
            "#,
        )
        .bind(upload_ids)
        .bind(next_scan_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "scan_records", db.operation = "select"))]
    async fn due_records(
        &self,
        limit: i64,
        current_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScanRecord>, AppError> {
        let records = sqlx::query_as::<_, ScanRecord>(
            r#"
            SELECT id, upload_id, scans, quarantined, next_scan_at, virus_database_version_used,
                   last_scan_failed, scan_result, created_at, updated_at
            FROM scan_records
            WHERE NOT quarantined
              AND (
                (
                    next_scan_at IS NULL
                    AND $1::bigint IS NOT NULL
                    AND COALESCE(virus_database_version_used, 0) < $1::bigint
                )
                OR next_scan_at <= $2
              )
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(current_version)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self, record), fields(db.table = "scan_records", db.operation = "update", db.record_id = record.id))]
    async fn save_scan_result(&self, record: &ScanRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scan_records
            SET scans = $2,
                next_scan_at = $3,
                virus_database_version_used = $4,
                last_scan_failed = $5,
                scan_result = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.scans)
        .bind(record.next_scan_at)
        .bind(record.virus_database_version_used)
        .bind(record.last_scan_failed)
        .bind(&record.scan_result)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "scan_records", db.operation = "select"))]
    async fn quarantined_without_case(&self, limit: i64) -> Result<Vec<ScanRecord>, AppError> {
        let records = sqlx::query_as::<_, ScanRecord>(
            r#"
            SELECT sr.id, sr.upload_id, sr.scans, sr.quarantined, sr.next_scan_at,
                   sr.virus_database_version_used, sr.last_scan_failed, sr.scan_result,
                   sr.created_at, sr.updated_at
            FROM scan_records sr
            WHERE sr.quarantined
              AND NOT EXISTS (
                SELECT 1 FROM moderation_cases mc
                WHERE mc.upload_id = sr.upload_id AND mc.category = $2
              )
            ORDER BY sr.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(MALICIOUS_FILE_REASON)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "scan_records", db.operation = "delete"))]
    async fn remove_orphaned(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM scan_records sr
            WHERE NOT EXISTS (SELECT 1 FROM uploads u WHERE u.id = sr.upload_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "scan_records", db.operation = "delete"))]
    async fn delete_for_upload(&self, upload_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM scan_records WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "scan_records", db.operation = "select"))]
    async fn stats(&self) -> Result<ScanStats, AppError> {
        let (scans, recently_scanned, quarantined, found) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                r#"
                SELECT
                    COALESCE(SUM(scans), 0)::bigint,
                    COUNT(*) FILTER (
                        WHERE scans > 0 AND updated_at >= NOW() - INTERVAL '24 hours'
                    ),
                    COUNT(*) FILTER (WHERE quarantined),
                    (SELECT COUNT(*) FROM moderation_cases WHERE category = $1)
                FROM scan_records
                "#,
            )
            .bind(MALICIOUS_FILE_REASON)
            .fetch_one(&self.pool)
            .await?;

        Ok(ScanStats {
            scans,
            recently_scanned,
            quarantined,
            found,
        })
    }
}
