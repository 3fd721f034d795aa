use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-upload scan bookkeeping.
///
/// `next_scan_at == None` means the record is rescanned whenever the signature database
/// advances past `virus_database_version_used`. Once the upload is older than a week the
/// record switches to a widening weekly cadence driven by `next_scan_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ScanRecord {
    pub id: i64,
    pub upload_id: i64,
    pub scans: i32,
    pub quarantined: bool,
    pub next_scan_at: Option<DateTime<Utc>>,
    pub virus_database_version_used: Option<i64>,
    pub last_scan_failed: bool,
    pub scan_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanRecord {
    /// A record for a freshly enqueued upload, first eligible after `initial_delay`.
    pub fn pending(upload_id: i64, now: DateTime<Utc>, initial_delay: Duration) -> Self {
        Self {
            id: 0,
            upload_id,
            scans: 0,
            quarantined: false,
            next_scan_at: Some(now + initial_delay),
            virus_database_version_used: None,
            last_scan_failed: false,
            scan_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scan phase should pick this record up.
    ///
    /// Mirrors the selection query: quarantined records are never due; otherwise the
    /// record is due when its scheduled time has passed, or when it has no schedule and
    /// a newer signature database is known.
    pub fn is_due(&self, current_version: Option<i64>, now: DateTime<Utc>) -> bool {
        if self.quarantined {
            return false;
        }
        match self.next_scan_at {
            Some(at) => at <= now,
            None => current_version
                .map(|current| self.virus_database_version_used.unwrap_or(0) < current)
                .unwrap_or(false),
        }
    }

    /// Records a completed scan (clean or positive) against `database_version`.
    pub fn mark_as_scanned_with(
        &mut self,
        message: &str,
        database_version: i64,
        upload_created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.scans += 1;
        self.virus_database_version_used = Some(database_version);
        self.last_scan_failed = false;
        self.scan_result = Some(message.to_string());
        self.next_scan_at = next_rescan_at(self.next_scan_at, upload_created_at, now);
        self.updated_at = now;
    }

    /// Records an attempt that never produced a verdict (download or transport failure).
    pub fn mark_scan_failed(&mut self, message: &str, now: DateTime<Utc>, retry_delay: Duration) {
        self.last_scan_failed = true;
        self.scan_result = Some(message.to_string());
        self.next_scan_at = Some(now + retry_delay);
        self.updated_at = now;
    }

    /// Records a daemon-reported error. The attempt counts, the signature version does not.
    pub fn mark_daemon_error(&mut self, message: &str, now: DateTime<Utc>, retry_delay: Duration) {
        self.scans += 1;
        self.mark_scan_failed(message, now, retry_delay);
    }
}

/// Calendar week of the upload's life, 1 during the first seven days.
pub fn week_number(upload_created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let days = (now.date_naive() - upload_created_at.date_naive())
        .num_days()
        .max(0);
    days / 7 + 1
}

/// Rescan policy after a successful scan.
///
/// First week: no schedule, so every signature update triggers a rescan. Afterwards the
/// gap grows with the upload's age: one week the first time, then `week_number - 1` weeks.
pub fn next_rescan_at(
    previous: Option<DateTime<Utc>>,
    upload_created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let week = week_number(upload_created_at, now);
    if week <= 1 {
        return None;
    }
    match previous {
        None => Some(now + Duration::weeks(1)),
        Some(_) => Some(now + Duration::weeks(week - 1)),
    }
}
