use thiserror::Error;

/// Failures talking to a daemon. None of these are fatal to a batch.
#[derive(Debug, Error)]
pub enum ClamAvError {
    #[error("Antivirus endpoint {endpoint} unreachable: {source}")]
    EndpointUnreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Antivirus {operation} timed out")]
    ProtocolTimeout { operation: &'static str },

    #[error("Antivirus daemon closed the connection")]
    ConnectionClosed,

    #[error("Malformed antivirus response: {0}")]
    MalformedResponse(String),

    #[error("Antivirus socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes being scanned could not be read.
    #[error("Failed to read scan source: {0}")]
    Source(#[source] std::io::Error),

    #[error("Endpoint discovery failed: {0}")]
    Resolve(String),
}
