use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine and signature database versions reported by one daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub engine_version: String,
    pub database_version: i64,
    pub updated_at: String,
}

/// A daemon address, either configured statically or discovered through SRV records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
}

impl PoolEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PoolEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Strips the trailing terminator and the `N: ` session index prefix from a daemon reply.
pub fn clean_response(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('\0').trim();
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    let without_prefix = match trimmed[digits..].strip_prefix(": ") {
        Some(rest) if digits > 0 => rest,
        _ => trimmed,
    };
    without_prefix.trim().to_string()
}

/// Verdict of a single scan attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub found: bool,
    pub error: bool,
    pub message: String,
}

impl ScanOutcome {
    pub fn clean(message: impl Into<String>) -> Self {
        Self {
            found: false,
            error: false,
            message: message.into(),
        }
    }

    pub fn infected(message: impl Into<String>) -> Self {
        Self {
            found: true,
            error: false,
            message: message.into(),
        }
    }

    pub fn daemon_error(message: impl Into<String>) -> Self {
        Self {
            found: false,
            error: true,
            message: message.into(),
        }
    }

    /// Classifies a raw INSTREAM reply: FOUND wins over ERROR, anything else is clean.
    pub fn from_response(raw: &str) -> Self {
        let message = clean_response(raw);
        let upper = message.to_uppercase();
        if upper.contains("FOUND") {
            Self::infected(message)
        } else if upper.contains("ERROR") {
            Self::daemon_error(message)
        } else {
            Self::clean(message)
        }
    }
}

/// Aggregate counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Sum of scan attempts over all records
    pub scans: i64,
    /// Records touched in the last 24 hours
    pub recently_scanned: i64,
    pub quarantined: i64,
    /// Moderation cases raised for malicious files
    pub found: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_index_prefix_and_terminator() {
        assert_eq!(clean_response("1: PONG\0"), "PONG");
        assert_eq!(clean_response("PONG\n"), "PONG");
        assert_eq!(clean_response("12: stream: OK\0"), "stream: OK");
    }

    #[test]
    fn found_is_case_insensitive() {
        let outcome = ScanOutcome::from_response("1: stream: Win.Test.EICAR_HDB-1 found\0");
        assert!(outcome.found);
        assert!(!outcome.error);
        assert_eq!(outcome.message, "stream: Win.Test.EICAR_HDB-1 found");
    }

    #[test]
    fn error_reply_is_not_a_detection() {
        let outcome = ScanOutcome::from_response("1: INSTREAM size limit exceeded. ERROR\0");
        assert_eq!(
            outcome,
            ScanOutcome::daemon_error("INSTREAM size limit exceeded. ERROR")
        );
    }

    #[test]
    fn ok_reply_is_clean() {
        let outcome = ScanOutcome::from_response("1: stream: OK\0");
        assert!(!outcome.found && !outcome.error);
    }
}
