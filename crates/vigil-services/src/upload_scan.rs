//! Live check run before an upload is accepted.

use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use vigil_core::{AntivirusConfig, UploadKind};

use crate::clamav::ClamAvServicesPool;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadRejected {
    #[error("Upload rejected: {0}")]
    VirusFound(String),

    #[error("Upload could not be scanned: {0}")]
    ScanInconclusive(String),

    #[error("Antivirus scanner unavailable")]
    ScannerUnavailable,
}

/// Scans incoming bytes before they are stored.
///
/// Fails open (the upload is allowed) when no daemon can be reached, unless
/// `CLAMAV_FAIL_CLOSED` is set.
#[derive(Clone)]
pub struct UploadScanHook {
    pool: Arc<ClamAvServicesPool>,
    config: AntivirusConfig,
}

impl UploadScanHook {
    pub fn new(pool: Arc<ClamAvServicesPool>, config: AntivirusConfig) -> Self {
        Self { pool, config }
    }

    /// Whether an upload of `kind` goes through the live scan at all.
    pub fn should_scan(&self, kind: UploadKind, validation_requested: bool) -> bool {
        if !self.config.enabled || !validation_requested {
            return false;
        }
        match kind {
            UploadKind::Export => false,
            UploadKind::Image => self.config.live_scan_images,
            UploadKind::Attachment => true,
        }
    }

    #[tracing::instrument(skip(self, source))]
    pub async fn validate<R>(
        &self,
        source: R,
        kind: UploadKind,
        validation_requested: bool,
    ) -> Result<(), UploadRejected>
    where
        R: AsyncRead + Unpin + Send,
    {
        if !self.should_scan(kind, validation_requested) {
            return Ok(());
        }

        let Some(conn) = self.pool.find_online().await else {
            tracing::warn!("No antivirus daemon online for live upload scan");
            return self.unavailable();
        };

        match self.pool.client().stream_scan(conn, source).await {
            Ok(outcome) if outcome.found => {
                tracing::warn!(scan_result = %outcome.message, "Upload rejected by antivirus");
                Err(UploadRejected::VirusFound(outcome.message))
            }
            Ok(outcome) if outcome.error => Err(UploadRejected::ScanInconclusive(outcome.message)),
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Live upload scan failed");
                self.unavailable()
            }
        }
    }

    pub async fn validate_bytes(
        &self,
        bytes: &[u8],
        kind: UploadKind,
        validation_requested: bool,
    ) -> Result<(), UploadRejected> {
        self.validate(bytes, kind, validation_requested).await
    }

    fn unavailable(&self) -> Result<(), UploadRejected> {
        if self.config.fail_closed {
            Err(UploadRejected::ScannerUnavailable)
        } else {
            Ok(())
        }
    }
}
