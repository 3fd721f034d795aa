use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use vigil_core::constants::VERSIONS_STATUS_KEY;
use vigil_core::VersionInfo;
use vigil_db::{StatusStore, StatusStoreExt};

use super::pool::ClamAvServicesPool;

const DEFAULT_TTL_HOURS: i64 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedVersions {
    versions: Vec<VersionInfo>,
    fetched_at: DateTime<Utc>,
}

/// Signature database versions reported by the daemons.
///
/// Kept in memory and in the status store so every process agrees on the "current"
/// version. A refresh that reaches no daemon keeps the last known good value.
pub struct VersionTracker {
    pool: Arc<ClamAvServicesPool>,
    status: Arc<dyn StatusStore>,
    ttl: chrono::Duration,
    cache: RwLock<Option<CachedVersions>>,
}

impl VersionTracker {
    pub fn new(pool: Arc<ClamAvServicesPool>, status: Arc<dyn StatusStore>, ttl: Duration) -> Self {
        Self {
            pool,
            status,
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(DEFAULT_TTL_HOURS)),
            cache: RwLock::new(None),
        }
    }

    fn is_fresh(&self, cached: &CachedVersions) -> bool {
        Utc::now() - cached.fetched_at < self.ttl
    }

    /// Cached versions, refreshed from the daemons once older than the TTL.
    pub async fn versions(&self) -> Vec<VersionInfo> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if self.is_fresh(cached) {
                return cached.versions.clone();
            }
        }

        if let Some(persisted) = self.load_persisted().await {
            if self.is_fresh(&persisted) {
                let versions = persisted.versions.clone();
                *self.cache.write().await = Some(persisted);
                return versions;
            }
        }

        self.refresh().await
    }

    /// Queries every daemon for its version.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Vec<VersionInfo> {
        let connections = self.pool.all_connections().await;
        let client = self.pool.client();
        let results = join_all(
            connections
                .into_iter()
                .flatten()
                .map(|conn| client.fetch_version(conn)),
        )
        .await;

        let mut versions = Vec::new();
        for result in results {
            match result {
                Ok(version) => versions.push(version),
                Err(e) => tracing::warn!(error = %e, "Failed to fetch antivirus version"),
            }
        }

        if versions.is_empty() {
            tracing::warn!("No antivirus daemon reported a version, keeping last known value");
            return self.last_known().await;
        }

        let cached = CachedVersions {
            versions: versions.clone(),
            fetched_at: Utc::now(),
        };
        if let Err(e) = self.status.set_typed(VERSIONS_STATUS_KEY, &cached).await {
            tracing::warn!(error = %e, "Failed to persist antivirus versions");
        }
        *self.cache.write().await = Some(cached);

        tracing::info!(
            database_version = versions[0].database_version,
            daemons = versions.len(),
            "Antivirus versions refreshed"
        );
        versions
    }

    /// Drops the in-memory copy; the next `versions` call reloads or refetches.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Database version of the first daemon, if any is known.
    pub async fn current_database_version(&self) -> Option<i64> {
        self.versions()
            .await
            .first()
            .map(|version| version.database_version)
    }

    async fn last_known(&self) -> Vec<VersionInfo> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return cached.versions.clone();
        }
        self.load_persisted()
            .await
            .map(|persisted| persisted.versions)
            .unwrap_or_default()
    }

    async fn load_persisted(&self) -> Option<CachedVersions> {
        match self.status.get_typed::<CachedVersions>(VERSIONS_STATUS_KEY).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted antivirus versions");
                None
            }
        }
    }
}
