//! Queue and scan phases of background scanning

mod service;

pub use service::BackgroundScanService;
