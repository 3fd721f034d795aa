//! Database repositories
//
// Store traits consumed by vigil-services
pub mod traits;
//
// Postgres implementations
pub mod quarantine;
pub mod scan_record;
pub mod status;
pub mod upload;
//
// Transaction and migration utilities
pub mod migrate;
pub mod transaction;

pub use migrate::run_migrations;
pub use quarantine::PgQuarantineRepository;
pub use scan_record::PgScanRecordRepository;
pub use status::PgStatusStore;
pub use traits::{
    FlagOutcome, QuarantineOutcome, QuarantineRequest, QuarantineStore, ScanRecordStore,
    StatusStore, StatusStoreExt, UploadStore,
};
pub use upload::PgUploadRepository;
