//! Data models
//!
//! Scan bookkeeping types and the slices of collaborator data (uploads, referencing
//! documents, moderation cases) the scanner reads and writes.

mod moderation;
mod scan;
mod scan_record;
mod upload;

pub use moderation::*;
pub use scan::*;
pub use scan_record::*;
pub use upload::*;
