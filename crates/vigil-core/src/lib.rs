//! Vigil Core Library
//!
//! This crate provides the domain models, error types, configuration and the pure
//! scheduling/redaction logic shared by every Vigil component.

pub mod config;
pub mod constants;
pub mod error;
pub mod flagging;
pub mod models;
pub mod redaction;
pub mod storage_types;

// Re-export commonly used types
pub use config::{AntivirusConfig, Config};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use flagging::{DocumentRedaction, FlagPlan};
pub use models::{
    ModerationCase, PoolEndpoint, QuarantinePayload, ReferencingDocument, ScanOutcome, ScanRecord,
    ScanStats, Upload, UploadKind, VersionInfo,
};
pub use redaction::redact_upload_references;
pub use storage_types::StorageBackend;
