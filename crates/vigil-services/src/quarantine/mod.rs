mod service;

pub use service::QuarantineService;
