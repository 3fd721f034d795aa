use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use vigil_core::constants::MALICIOUS_FILE_REASON;
use vigil_core::{AppError, FlagPlan, ModerationCase, ReferencingDocument};

use super::traits::{FlagOutcome, QuarantineOutcome, QuarantineRequest, QuarantineStore};
use super::transaction::TransactionGuard;

/// Postgres quarantine transitions.
///
/// Claiming uses a conditional `UPDATE ... WHERE NOT quarantined`, so of two concurrent
/// invocations for the same upload exactly one sees a row come back.
#[derive(Clone)]
pub struct PgQuarantineRepository {
    pool: PgPool,
}

impl PgQuarantineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn flag_in_tx(
        conn: &mut PgConnection,
        request: &QuarantineRequest,
    ) -> Result<FlagOutcome, AppError> {
        let upload = &request.upload;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM moderation_cases WHERE category = $1 AND upload_id = $2",
        )
        .bind(MALICIOUS_FILE_REASON)
        .bind(upload.id)
        .fetch_optional(&mut *conn)
        .await?;
        if existing.is_some() {
            return Ok(FlagOutcome::AlreadyFlagged);
        }

        let username = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
            .bind(upload.user_id)
            .fetch_optional(&mut *conn)
            .await?
            .unwrap_or_else(|| format!("user{}", upload.user_id));

        let documents = sqlx::query_as::<_, ReferencingDocument>(
            r#"
            SELECT d.id, d.user_id, d.topic_id, d.raw, d.locked_by_id
            FROM documents d
            JOIN upload_references ur ON ur.document_id = d.id
            WHERE ur.upload_id = $1
            ORDER BY d.id
            FOR UPDATE OF d
            "#,
        )
        .bind(upload.id)
        .fetch_all(&mut *conn)
        .await?;

        let plan = FlagPlan::build(
            upload,
            &username,
            &documents,
            &request.scan_message,
            &request.placeholder,
        )?;

        for redaction in &plan.redactions {
            sqlx::query(
                r#"
                UPDATE documents
                SET raw = COALESCE($2, raw), locked_by_id = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(redaction.document_id)
            .bind(&redaction.raw)
            .bind(request.system_user_id)
            .execute(&mut *conn)
            .await?;
        }

        let case_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO moderation_cases (
                category, upload_id, topic_id, created_by_id, target_created_by_id, status, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (category, upload_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(MALICIOUS_FILE_REASON)
        .bind(upload.id)
        .bind(plan.topic_id)
        .bind(request.system_user_id)
        .bind(upload.user_id)
        .bind(ModerationCase::STATUS_PENDING)
        .bind(serde_json::to_value(&plan.payload)?)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(case_id) = case_id else {
            return Ok(FlagOutcome::AlreadyFlagged);
        };

        sqlx::query(
            r#"
            INSERT INTO moderation_scores (case_id, user_id, score_type, reason)
            VALUES ($1, $2, $3, $3)
            "#,
        )
        .bind(case_id)
        .bind(request.system_user_id)
        .bind(MALICIOUS_FILE_REASON)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_notifications (user_id, notification_type, data)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(upload.user_id)
        .bind(MALICIOUS_FILE_REASON)
        .bind(serde_json::json!({ "filename": upload.original_filename }))
        .execute(&mut *conn)
        .await?;

        tracing::info!(
            upload_id = upload.id,
            case_id,
            redacted_documents = plan.redactions.len(),
            "Moderation case created for malicious upload"
        );

        Ok(FlagOutcome::Flagged { case_id })
    }
}

#[async_trait]
impl QuarantineStore for PgQuarantineRepository {
    #[tracing::instrument(skip(self, request), fields(db.table = "scan_records", db.operation = "update", upload_id = request.upload.id))]
    async fn quarantine(
        &self,
        request: &QuarantineRequest,
        flag: bool,
    ) -> Result<QuarantineOutcome, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "quarantine").await?;

        sqlx::query(
            r#"
            INSERT INTO scan_records (upload_id, created_at, updated_at)
            VALUES ($1, NOW(), NOW())
            ON CONFLICT (upload_id) DO NOTHING
            "#,
        )
        .bind(request.upload.id)
        .execute(&mut *tx)
        .await?;

        let claimed = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE scan_records
            SET quarantined = TRUE, updated_at = NOW()
            WHERE upload_id = $1 AND NOT quarantined
            RETURNING id
            "#,
        )
        .bind(request.upload.id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(QuarantineOutcome::AlreadyQuarantined);
        }

        let case_id = if flag {
            match Self::flag_in_tx(&mut tx, request).await? {
                FlagOutcome::Flagged { case_id } => Some(case_id),
                FlagOutcome::AlreadyFlagged => None,
            }
        } else {
            None
        };

        tx.commit().await?;

        Ok(QuarantineOutcome::Quarantined { case_id })
    }

    #[tracing::instrument(skip(self, request), fields(db.table = "moderation_cases", db.operation = "insert", upload_id = request.upload.id))]
    async fn flag(&self, request: &QuarantineRequest) -> Result<FlagOutcome, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "flag_quarantined").await?;
        let outcome = Self::flag_in_tx(&mut tx, request).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    #[tracing::instrument(skip(self), fields(db.table = "moderation_cases", db.operation = "select"))]
    async fn has_case(&self, upload_id: i64) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM moderation_cases WHERE category = $1 AND upload_id = $2)",
        )
        .bind(MALICIOUS_FILE_REASON)
        .bind(upload_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
