//! Database transaction utilities
//!
//! Quarantine is the only multi-statement write in the scanner; it runs through
//! [`TransactionGuard`] so the commit is logged with its duration.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use vigil_core::AppError;

/// A Postgres transaction tagged with the operation it belongs to.
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the transaction back.
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(&pool, "quarantine").await?;
/// sqlx::query("UPDATE ...").execute(&mut *tx).await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard<'a> {
    transaction: Transaction<'a, Postgres>,
    operation: &'static str,
    started: Instant,
}

impl<'a> TransactionGuard<'a> {
    pub async fn begin(pool: &'a PgPool, operation: &'static str) -> Result<Self, AppError> {
        let transaction = pool.begin().await?;

        Ok(Self {
            transaction,
            operation,
            started: Instant::now(),
        })
    }

    pub async fn commit(self) -> Result<(), AppError> {
        let operation = self.operation;
        let started = self.started;

        self.transaction.commit().await.map_err(|e| {
            tracing::error!(error = %e, operation, "Failed to commit database transaction");
            AppError::Database(e)
        })?;

        tracing::debug!(
            operation,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Database transaction committed"
        );
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), AppError> {
        tracing::debug!(operation = self.operation, "Rolling back database transaction");
        self.transaction.rollback().await?;
        Ok(())
    }
}

impl Deref for TransactionGuard<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

impl DerefMut for TransactionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.transaction
    }
}
