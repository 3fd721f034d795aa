use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::fs;

/// Local filesystem storage
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// `base_path` is the directory the host application stores uploads under.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        let metadata = fs::metadata(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Storage directory {} is not accessible: {}",
                base_path.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::ConfigError(format!(
                "Storage path {} is not a directory",
                base_path.display()
            )));
        }

        Ok(LocalStorage { base_path })
    }

    /// Convert a storage key to a path, refusing anything that escapes the base directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty() || storage_key.contains("..") || storage_key.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(storage_key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        let key = storage_key.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(error = %e, key = %key, "Local storage stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn read_all(storage: &LocalStorage, key: &str) -> StorageResult<Vec<u8>> {
        let mut stream = storage.download_stream(key).await?;
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected)
    }

    #[tokio::test]
    async fn streams_file_content() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("original")).unwrap();
        std::fs::write(dir.path().join("original/abc.txt"), b"hello scanner").unwrap();

        let storage = LocalStorage::new(dir.path()).await.unwrap();

        assert_eq!(
            read_all(&storage, "original/abc.txt").await.unwrap(),
            b"hello scanner".to_vec()
        );
        assert_eq!(storage.backend_type(), StorageBackend::Local);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        assert!(matches!(
            storage.download_stream("nope.bin").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let result = storage.download_stream("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.download_stream("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn missing_base_directory_is_a_config_error() {
        let dir = tempdir().unwrap();
        let result = LocalStorage::new(dir.path().join("absent")).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
