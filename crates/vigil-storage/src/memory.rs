//! In-memory storage for tests

use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mock storage holding objects in a map
#[derive(Clone)]
pub struct MemoryStorage {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    chunk_size: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            chunk_size: 1024,
        }
    }

    /// Size of the chunks yielded by `download_stream`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    /// Makes downloads of `key` fail with a backend error.
    pub fn fail_downloads_of(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    fn fetch(&self, key: &str) -> StorageResult<Vec<u8>> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(StorageError::DownloadFailed(format!("simulated failure for {key}")));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let data = self.fetch(storage_key)?;
        let chunks: Vec<Result<Bytes, StorageError>> = data
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
