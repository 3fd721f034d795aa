use async_trait::async_trait;
use sqlx::PgPool;
use vigil_core::AppError;

use super::traits::StatusStore;

/// JSON key/value rows in `status_store`
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    #[tracing::instrument(skip(self), fields(db.table = "status_store", db.operation = "select"))]
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM status_store WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    #[tracing::instrument(skip(self, value), fields(db.table = "status_store", db.operation = "upsert"))]
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO status_store (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
