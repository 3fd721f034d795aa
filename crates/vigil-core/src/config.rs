//! Configuration module
//!
//! Settings are read from the environment (after loading `.env` through dotenvy). Every
//! value has a typed default; malformed numbers fall back to the default rather than
//! failing startup.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::constants::{DEFAULT_CLAMAV_PORT, DEFAULT_QUARANTINE_PLACEHOLDER};
use crate::error::AppError;
use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const CLAMAV_CONNECT_TIMEOUT_SECS: u64 = 3;
const CLAMAV_READ_TIMEOUT_SECS: u64 = 5;
const SYSTEM_USER_ID: i64 = -1;
const BATCH_SIZE: i64 = 1000;
const SCAN_INITIAL_DELAY_MINUTES: i64 = 10;
const SCAN_FAILURE_RETRY_HOURS: i64 = 24;
const VERSION_REFRESH_HOURS: u64 = 6;
const QUEUE_INTERVAL_SECS: u64 = 600;
const SCAN_INTERVAL_SECS: u64 = 900;
const FLAG_INTERVAL_SECS: u64 = 3 * 60 * 60;
const ORPHAN_INTERVAL_SECS: u64 = 60 * 60;

// Upper bounds for env-supplied delays and cadences, one year each.
const MAX_DELAY_MINUTES: i64 = 365 * 24 * 60;
const MAX_DELAY_HOURS: i64 = 365 * 24;
const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;
const MAX_SOCKET_TIMEOUT_SECS: u64 = 60 * 60;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<(), AppError>
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        return Err(AppError::ConfigurationInvalid(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// Antivirus settings: daemon discovery, socket bounds, batch sizes and job cadences.
#[derive(Clone, Debug)]
pub struct AntivirusConfig {
    pub enabled: bool,
    /// Static daemon hosts. Ignored when `srv_record` is set.
    pub clamav_hosts: Vec<String>,
    pub clamav_port: u16,
    pub srv_record: Option<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub fail_closed: bool,
    pub live_scan_images: bool,
    pub flag_malicious_uploads: bool,
    pub system_user_id: i64,
    pub queue_batch_size: i64,
    pub scan_batch_size: i64,
    pub flag_batch_size: i64,
    pub initial_scan_delay_minutes: i64,
    pub failure_retry_hours: i64,
    pub version_refresh_hours: u64,
    pub quarantine_placeholder: String,
    pub queue_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub flag_interval_secs: u64,
    pub orphan_interval_secs: u64,
}

impl Default for AntivirusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            clamav_hosts: Vec::new(),
            clamav_port: DEFAULT_CLAMAV_PORT,
            srv_record: None,
            connect_timeout_secs: CLAMAV_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: CLAMAV_READ_TIMEOUT_SECS,
            fail_closed: false,
            live_scan_images: false,
            flag_malicious_uploads: true,
            system_user_id: SYSTEM_USER_ID,
            queue_batch_size: BATCH_SIZE,
            scan_batch_size: BATCH_SIZE,
            flag_batch_size: BATCH_SIZE,
            initial_scan_delay_minutes: SCAN_INITIAL_DELAY_MINUTES,
            failure_retry_hours: SCAN_FAILURE_RETRY_HOURS,
            version_refresh_hours: VERSION_REFRESH_HOURS,
            quarantine_placeholder: DEFAULT_QUARANTINE_PLACEHOLDER.to_string(),
            queue_interval_secs: QUEUE_INTERVAL_SECS,
            scan_interval_secs: SCAN_INTERVAL_SECS,
            flag_interval_secs: FLAG_INTERVAL_SECS,
            orphan_interval_secs: ORPHAN_INTERVAL_SECS,
        }
    }
}

impl AntivirusConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let clamav_hosts = env::var("CLAMAV_HOST")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            enabled: env_bool("ANTIVIRUS_ENABLED", false),
            clamav_hosts,
            clamav_port: env::var("CLAMAV_PORT")
                .unwrap_or_else(|_| DEFAULT_CLAMAV_PORT.to_string())
                .parse()
                .unwrap_or(DEFAULT_CLAMAV_PORT),
            srv_record: env_opt("ANTIVIRUS_SRV_RECORD"),
            connect_timeout_secs: env::var("CLAMAV_CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| CLAMAV_CONNECT_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CLAMAV_CONNECT_TIMEOUT_SECS),
            read_timeout_secs: env::var("CLAMAV_READ_TIMEOUT_SECS")
                .unwrap_or_else(|_| CLAMAV_READ_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CLAMAV_READ_TIMEOUT_SECS),
            fail_closed: env_bool("CLAMAV_FAIL_CLOSED", false),
            live_scan_images: env_bool("ANTIVIRUS_LIVE_SCAN_IMAGES", false),
            flag_malicious_uploads: env_bool("FLAG_MALICIOUS_UPLOADS", true),
            system_user_id: env::var("SYSTEM_USER_ID")
                .unwrap_or_else(|_| SYSTEM_USER_ID.to_string())
                .parse()
                .unwrap_or(SYSTEM_USER_ID),
            queue_batch_size: env::var("SCAN_QUEUE_BATCH_SIZE")
                .unwrap_or_else(|_| BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(BATCH_SIZE),
            scan_batch_size: env::var("SCAN_BATCH_SIZE")
                .unwrap_or_else(|_| BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(BATCH_SIZE),
            flag_batch_size: env::var("FLAG_BATCH_SIZE")
                .unwrap_or_else(|_| BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(BATCH_SIZE),
            initial_scan_delay_minutes: env::var("SCAN_INITIAL_DELAY_MINUTES")
                .unwrap_or_else(|_| SCAN_INITIAL_DELAY_MINUTES.to_string())
                .parse()
                .unwrap_or(SCAN_INITIAL_DELAY_MINUTES),
            failure_retry_hours: env::var("SCAN_FAILURE_RETRY_HOURS")
                .unwrap_or_else(|_| SCAN_FAILURE_RETRY_HOURS.to_string())
                .parse()
                .unwrap_or(SCAN_FAILURE_RETRY_HOURS),
            version_refresh_hours: env::var("VERSION_REFRESH_HOURS")
                .unwrap_or_else(|_| VERSION_REFRESH_HOURS.to_string())
                .parse()
                .unwrap_or(VERSION_REFRESH_HOURS),
            quarantine_placeholder: env_opt("QUARANTINE_PLACEHOLDER")
                .unwrap_or(defaults.quarantine_placeholder),
            queue_interval_secs: env::var("QUEUE_INTERVAL_SECS")
                .unwrap_or_else(|_| QUEUE_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(QUEUE_INTERVAL_SECS),
            scan_interval_secs: env::var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| SCAN_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(SCAN_INTERVAL_SECS),
            flag_interval_secs: env::var("FLAG_INTERVAL_SECS")
                .unwrap_or_else(|_| FLAG_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(FLAG_INTERVAL_SECS),
            orphan_interval_secs: env::var("ORPHAN_INTERVAL_SECS")
                .unwrap_or_else(|_| ORPHAN_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(ORPHAN_INTERVAL_SECS),
        }
    }

    /// True when some way of locating daemons is configured.
    pub fn correctly_configured(&self) -> bool {
        self.srv_record.is_some() || !self.clamav_hosts.is_empty()
    }

    /// Rejects turning the feature on without any endpoint configuration, and values
    /// outside the ranges the scheduler can represent.
    pub fn validate_enable(&self) -> Result<(), AppError> {
        if self.enabled && !self.correctly_configured() {
            return Err(AppError::ConfigurationInvalid(
                "ANTIVIRUS_ENABLED=true requires ANTIVIRUS_SRV_RECORD or CLAMAV_HOST".to_string(),
            ));
        }
        if self.clamav_port == 0 {
            return Err(AppError::ConfigurationInvalid(
                "CLAMAV_PORT must be greater than zero".to_string(),
            ));
        }

        check_range(
            "CLAMAV_CONNECT_TIMEOUT_SECS",
            self.connect_timeout_secs,
            1,
            MAX_SOCKET_TIMEOUT_SECS,
        )?;
        check_range(
            "CLAMAV_READ_TIMEOUT_SECS",
            self.read_timeout_secs,
            1,
            MAX_SOCKET_TIMEOUT_SECS,
        )?;
        check_range(
            "SCAN_INITIAL_DELAY_MINUTES",
            self.initial_scan_delay_minutes,
            0,
            MAX_DELAY_MINUTES,
        )?;
        check_range(
            "SCAN_FAILURE_RETRY_HOURS",
            self.failure_retry_hours,
            1,
            MAX_DELAY_HOURS,
        )?;
        check_range(
            "VERSION_REFRESH_HOURS",
            self.version_refresh_hours,
            1,
            MAX_DELAY_HOURS as u64,
        )?;
        for (name, batch) in [
            ("SCAN_QUEUE_BATCH_SIZE", self.queue_batch_size),
            ("SCAN_BATCH_SIZE", self.scan_batch_size),
            ("FLAG_BATCH_SIZE", self.flag_batch_size),
        ] {
            check_range(name, batch, 1, i64::from(i32::MAX))?;
        }
        for (name, secs) in [
            ("QUEUE_INTERVAL_SECS", self.queue_interval_secs),
            ("SCAN_INTERVAL_SECS", self.scan_interval_secs),
            ("FLAG_INTERVAL_SECS", self.flag_interval_secs),
            ("ORPHAN_INTERVAL_SECS", self.orphan_interval_secs),
        ] {
            check_range(name, secs, 1, MAX_INTERVAL_SECS)?;
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    // The getters clamp so an unvalidated config can never overflow date arithmetic.

    pub fn initial_scan_delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.initial_scan_delay_minutes.clamp(0, MAX_DELAY_MINUTES))
    }

    pub fn failure_retry_delay(&self) -> chrono::Duration {
        chrono::Duration::hours(self.failure_retry_hours.clamp(1, MAX_DELAY_HOURS))
    }

    pub fn version_ttl(&self) -> Duration {
        let hours = self.version_refresh_hours.clamp(1, MAX_DELAY_HOURS as u64);
        Duration::from_secs(hours * 60 * 60)
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub aws_region: Option<String>,
    pub antivirus: AntivirusConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()?;

        Ok(Config {
            database_url,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            storage_backend,
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION"),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            aws_region: env_opt("AWS_REGION"),
            antivirus: AntivirusConfig::from_env(),
        })
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        self.antivirus.validate_enable()?;

        Ok(())
    }
}
