//! Adapts a storage byte stream to `AsyncRead` so it can be fed to the scanner chunk by chunk.

use crate::traits::{Storage, StorageError, StorageResult};
use futures::StreamExt;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Opens `storage_key` for streaming reads. Mid-stream failures surface as `io::Error`.
pub async fn open_reader(storage: &dyn Storage, storage_key: &str) -> StorageResult<ByteReader> {
    let stream = storage.download_stream(storage_key).await?;
    let stream = stream.map(|chunk| {
        chunk.map_err(|e| match e {
            StorageError::IoError(io) => io,
            other => std::io::Error::other(other.to_string()),
        })
    });
    Ok(Box::pin(StreamReader::new(stream)))
}
