//! Database setup and service wiring

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use vigil_core::Config;
use vigil_db::{
    run_migrations, PgQuarantineRepository, PgScanRecordRepository, PgStatusStore,
    PgUploadRepository,
};
use vigil_services::{
    create_storage, BackgroundScanService, ClamAvServicesPool, QuarantineService, UploadScanHook,
    VersionTracker,
};
use vigil_worker::ScanJobs;

/// Setup database connection pool and run migrations
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Everything the subcommands need.
pub struct App {
    pub config: Config,
    pub clamav: Arc<ClamAvServicesPool>,
    pub versions: Arc<VersionTracker>,
    pub scanner: Arc<BackgroundScanService>,
    pub quarantine: Arc<QuarantineService>,
    pub upload_hook: UploadScanHook,
    pub jobs: Arc<ScanJobs>,
}

pub async fn initialize_app(config: Config) -> Result<App> {
    config.validate()?;
    let av = config.antivirus.clone();

    let db = setup_database(&config).await?;
    let scan_records = Arc::new(PgScanRecordRepository::new(db.clone()));
    let uploads = Arc::new(PgUploadRepository::new(db.clone()));
    let quarantine_store = Arc::new(PgQuarantineRepository::new(db.clone()));
    let status = Arc::new(PgStatusStore::new(db));

    let storage = create_storage(&config)
        .await
        .context("Failed to initialize storage backend")?;
    tracing::info!(backend = %storage.backend_type(), "Storage backend ready");

    let clamav = Arc::new(
        ClamAvServicesPool::from_config(&av, status.clone())
            .context("Failed to configure antivirus endpoints")?,
    );
    let versions = Arc::new(VersionTracker::new(
        clamav.clone(),
        status,
        av.version_ttl(),
    ));
    let quarantine = Arc::new(QuarantineService::new(
        quarantine_store,
        scan_records.clone(),
        uploads.clone(),
        av.clone(),
    ));
    let scanner = Arc::new(BackgroundScanService::new(
        scan_records,
        uploads,
        storage,
        clamav.clone(),
        versions.clone(),
        quarantine.clone(),
        av.clone(),
    ));
    let upload_hook = UploadScanHook::new(clamav.clone(), av.clone());
    let jobs = Arc::new(ScanJobs::new(
        scanner.clone(),
        quarantine.clone(),
        versions.clone(),
        av,
    ));

    Ok(App {
        config,
        clamav,
        versions,
        scanner,
        quarantine,
        upload_hook,
        jobs,
    })
}
