//! Periodic jobs
//!
//! Each job is a single-shot invocation of a service operation; [`JobScheduler`] runs
//! every job on its own interval until shut down.

pub mod jobs;
pub mod scheduler;

pub use jobs::{Job, JobRunner, ScanJobs};
pub use scheduler::JobScheduler;
