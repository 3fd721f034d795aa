//! Fixed values shared across crates.

/// Scan message recorded when the file bytes could not be fetched.
pub const DOWNLOAD_FAILED: &str = "Download failed";

/// Status store key holding the cached daemon versions.
pub const VERSIONS_STATUS_KEY: &str = "clamav-versions";

/// Status store key holding the "no daemon answered" flag.
pub const UNAVAILABLE_STATUS_KEY: &str = "clamav-unavailable";

/// Moderation score / notification type for infected uploads.
pub const MALICIOUS_FILE_REASON: &str = "malicious_file";

/// Upper bound on a single INSTREAM chunk.
pub const INSTREAM_CHUNK_SIZE: usize = 2048;

pub const DEFAULT_CLAMAV_PORT: u16 = 3310;

pub const DEFAULT_QUARANTINE_PLACEHOLDER: &str =
    "[quarantined: this file was flagged as malicious]";
