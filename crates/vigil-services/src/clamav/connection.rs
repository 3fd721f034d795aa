//! A single clamd session over TCP.
//!
//! All socket I/O goes through readiness checks (`ready` followed by `try_read` /
//! `try_write`) under a timeout, so a daemon that stops reading or answering can never
//! block a worker indefinitely. While writing, anything the daemon sends back is drained
//! into a buffer: clamd may reply (and hang up) before the upload has been fully
//! streamed, for example when a size limit is hit.

use bytes::BytesMut;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::time::timeout;
use vigil_core::PoolEndpoint;

use super::client::{END, IDSESSION};
use super::error::ClamAvError;

/// Replies longer than this without a terminator are treated as garbage.
const MAX_RESPONSE_LEN: usize = 64 * 1024;
const READ_BUF_LEN: usize = 4096;

/// Result of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Every byte was handed to the socket.
    Written,
    /// The daemon answered before the write finished; stop sending and read the reply.
    ResponsePending,
}

pub struct ClamConnection {
    stream: TcpStream,
    endpoint: PoolEndpoint,
    io_timeout: Duration,
    pending: BytesMut,
    peer_closed: bool,
}

impl ClamConnection {
    /// Connects to `endpoint` and opens an `IDSESSION`.
    pub async fn connect(
        endpoint: &PoolEndpoint,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, ClamAvError> {
        let addr = (endpoint.host.as_str(), endpoint.port);
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClamAvError::EndpointUnreachable {
                    endpoint: endpoint.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(ClamAvError::EndpointUnreachable {
                    endpoint: endpoint.to_string(),
                    source: std::io::Error::new(ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream,
            endpoint: endpoint.clone(),
            io_timeout,
            pending: BytesMut::new(),
            peer_closed: false,
        };
        conn.open_session().await?;
        Ok(conn)
    }

    pub fn endpoint(&self) -> &PoolEndpoint {
        &self.endpoint
    }

    async fn open_session(&mut self) -> Result<(), ClamAvError> {
        match self.send(IDSESSION).await? {
            WriteStatus::Written => Ok(()),
            // A reply before any command means the daemon refused the session
            WriteStatus::ResponsePending => {
                let reply = self.read_response().await?;
                Err(ClamAvError::MalformedResponse(reply))
            }
        }
    }

    /// True once a complete reply (or the remainder before a hang-up) is buffered.
    pub fn response_ready(&self) -> bool {
        self.pending.contains(&0) || (self.peer_closed && !self.pending.is_empty())
    }

    /// Writes all of `buf`, unless the daemon answers first.
    pub async fn send(&mut self, buf: &[u8]) -> Result<WriteStatus, ClamAvError> {
        let mut written = 0;
        while written < buf.len() {
            if self.response_ready() {
                return Ok(WriteStatus::ResponsePending);
            }
            if self.peer_closed {
                return Err(ClamAvError::ConnectionClosed);
            }

            let ready = timeout(
                self.io_timeout,
                self.stream.ready(Interest::READABLE | Interest::WRITABLE),
            )
            .await
            .map_err(|_| ClamAvError::ProtocolTimeout { operation: "write" })??;

            if ready.is_readable() {
                self.drain_readable()?;
                continue;
            }

            if ready.is_writable() {
                match self.stream.try_write(&buf[written..]) {
                    Ok(0) => return Err(ClamAvError::ConnectionClosed),
                    Ok(n) => written += n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                    Err(e)
                        if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) =>
                    {
                        self.drain_readable()?;
                        if !self.pending.is_empty() {
                            return Ok(WriteStatus::ResponsePending);
                        }
                        return Err(ClamAvError::ConnectionClosed);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(WriteStatus::Written)
    }

    /// Reads one NUL-terminated reply. The terminator is not included.
    pub async fn read_response(&mut self) -> Result<String, ClamAvError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == 0) {
                let line = self.pending.split_to(pos + 1);
                return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if self.peer_closed {
                if self.pending.is_empty() {
                    return Err(ClamAvError::ConnectionClosed);
                }
                let rest = self.pending.split();
                return Ok(String::from_utf8_lossy(&rest).into_owned());
            }

            let ready = timeout(self.io_timeout, self.stream.ready(Interest::READABLE))
                .await
                .map_err(|_| ClamAvError::ProtocolTimeout { operation: "read" })??;
            if ready.is_readable() {
                self.drain_readable()?;
            }
        }
    }

    /// Ends the session and closes the socket. Failures are ignored.
    pub async fn close(mut self) {
        if !self.peer_closed {
            if let Err(e) = self.send(END).await {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Failed to end antivirus session");
            }
        }
        let _ = self.stream.shutdown().await;
    }

    fn drain_readable(&mut self) -> Result<(), ClamAvError> {
        let mut buf = [0u8; READ_BUF_LEN];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    if self.pending.len() > MAX_RESPONSE_LEN {
                        return Err(ClamAvError::MalformedResponse(format!(
                            "reply from {} exceeds {} bytes",
                            self.endpoint, MAX_RESPONSE_LEN
                        )));
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
