//! Vigil Services Layer
//!
//! Orchestration on top of the stores: the clamd protocol client and service pool, the
//! signature version tracker, the background scanner, the quarantine workflow and the
//! live pre-upload check. Store implementations come from `vigil-db` and
//! `vigil-storage`; this crate only depends on their traits.

pub mod background_scan;
pub mod clamav;
pub mod quarantine;
pub mod upload_scan;

pub use background_scan::BackgroundScanService;
pub use clamav::{
    ClamAvClient, ClamAvError, ClamAvServicesPool, ClamConnection, EndpointResolver,
    StaticResolver, VersionTracker,
};
#[cfg(feature = "srv-discovery")]
pub use clamav::SrvResolver;
pub use quarantine::QuarantineService;
pub use upload_scan::{UploadRejected, UploadScanHook};
pub use vigil_storage::{create_storage, Storage, StorageError, StorageResult};
