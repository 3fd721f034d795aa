//! Vigil Storage Library
//!
//! Read access to the external store that owns uploaded file bytes. The scanner only
//! ever downloads: content is streamed into the antivirus daemon without being buffered
//! whole, through [`reader::open_reader`].
//!
//! Keys must not contain `..` or a leading `/`.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod reader;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryStorage;
pub use reader::{open_reader, ByteReader};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};
pub use vigil_core::StorageBackend;
