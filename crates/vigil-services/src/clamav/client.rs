use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use vigil_core::constants::INSTREAM_CHUNK_SIZE;
use vigil_core::models::clean_response;
use vigil_core::{ScanOutcome, VersionInfo};

use super::connection::{ClamConnection, WriteStatus};
use super::error::ClamAvError;

pub const IDSESSION: &[u8] = b"zIDSESSION\0";
pub const PING: &[u8] = b"zPING\0";
pub const VERSION: &[u8] = b"zVERSION\0";
pub const INSTREAM: &[u8] = b"zINSTREAM\0";
pub const END: &[u8] = b"zEND\0";

/// Issues clamd commands over an open session. Every call consumes the connection and
/// closes it afterwards.
#[derive(Debug, Clone)]
pub struct ClamAvClient {
    chunk_size: usize,
}

impl Default for ClamAvClient {
    fn default() -> Self {
        Self {
            chunk_size: INSTREAM_CHUNK_SIZE,
        }
    }
}

impl ClamAvClient {
    /// Caps the INSTREAM chunk size. Values are clamped to `1..=2048`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, INSTREAM_CHUNK_SIZE);
        self
    }

    /// `true` only for a `PONG` reply. Never fails.
    pub async fn ping(&self, mut conn: ClamConnection) -> bool {
        let reply = command(&mut conn, PING).await;
        conn.close().await;
        match reply {
            Ok(reply) => reply == "PONG",
            Err(e) => {
                tracing::debug!(error = %e, "Antivirus ping failed");
                false
            }
        }
    }

    /// Parses `engine/database/date` from a `VERSION` reply.
    pub async fn fetch_version(&self, mut conn: ClamConnection) -> Result<VersionInfo, ClamAvError> {
        let reply = command(&mut conn, VERSION).await;
        conn.close().await;
        parse_version(&reply?)
    }

    /// Streams `source` with INSTREAM and classifies the verdict.
    ///
    /// Stops sending as soon as the daemon replies early. Errors reading `source` come back
    /// as [`ClamAvError::Source`] so callers can tell them apart from daemon trouble.
    pub async fn stream_scan<R>(
        &self,
        mut conn: ClamConnection,
        mut source: R,
    ) -> Result<ScanOutcome, ClamAvError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.instream(&mut conn, &mut source).await;
        conn.close().await;
        result
    }

    async fn instream<R>(
        &self,
        conn: &mut ClamConnection,
        source: &mut R,
    ) -> Result<ScanOutcome, ClamAvError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut early_reply = conn.send(INSTREAM).await? == WriteStatus::ResponsePending;

        let mut chunk = vec![0u8; self.chunk_size];
        let mut frame = BytesMut::with_capacity(self.chunk_size + 4);
        while !early_reply {
            let read = source.read(&mut chunk).await.map_err(ClamAvError::Source)?;
            if read == 0 {
                break;
            }
            frame.clear();
            frame.put_u32(read as u32);
            frame.put_slice(&chunk[..read]);
            early_reply = conn.send(&frame).await? == WriteStatus::ResponsePending;
        }

        if !early_reply {
            conn.send(&0u32.to_be_bytes()).await?;
        }

        let raw = conn.read_response().await?;
        Ok(ScanOutcome::from_response(&raw))
    }
}

async fn command(conn: &mut ClamConnection, cmd: &[u8]) -> Result<String, ClamAvError> {
    conn.send(cmd).await?;
    let raw = conn.read_response().await?;
    Ok(clean_response(&raw))
}

fn parse_version(reply: &str) -> Result<VersionInfo, ClamAvError> {
    let parts: Vec<&str> = reply.split('/').collect();
    let [engine, database, updated_at] = parts.as_slice() else {
        return Err(ClamAvError::MalformedResponse(reply.to_string()));
    };
    let database_version = database
        .trim()
        .parse()
        .map_err(|_| ClamAvError::MalformedResponse(reply.to_string()))?;

    Ok(VersionInfo {
        engine_version: engine.trim().to_string(),
        database_version,
        updated_at: updated_at.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_reply() {
        let info = parse_version("ClamAV 1.3.1/27380/Tue Aug 27 08:40:39 2024").unwrap();
        assert_eq!(info.engine_version, "ClamAV 1.3.1");
        assert_eq!(info.database_version, 27380);
        assert_eq!(info.updated_at, "Tue Aug 27 08:40:39 2024");
    }

    #[test]
    fn rejects_version_without_three_parts() {
        assert!(matches!(
            parse_version("ClamAV 1.3.1"),
            Err(ClamAvError::MalformedResponse(_))
        ));
        assert!(parse_version("a/b/c/d").is_err());
    }

    #[test]
    fn rejects_non_numeric_database() {
        assert!(parse_version("ClamAV 1.3.1/latest/today").is_err());
    }

    #[test]
    fn chunk_size_is_clamped() {
        assert_eq!(ClamAvClient::default().chunk_size, 2048);
        assert_eq!(ClamAvClient::default().with_chunk_size(0).chunk_size, 1);
        assert_eq!(ClamAvClient::default().with_chunk_size(9000).chunk_size, 2048);
    }
}
