//! clamd client side
//!
//! Every exchange with a daemon is one session on a fresh TCP connection:
//! `zIDSESSION\0`, one command, the NUL-terminated reply, `zEND\0`, close.

mod client;
mod connection;
mod error;
mod pool;
mod resolver;
mod version;

pub use client::{ClamAvClient, END, IDSESSION, INSTREAM, PING, VERSION};
pub use connection::{ClamConnection, WriteStatus};
pub use error::ClamAvError;
pub use pool::ClamAvServicesPool;
#[cfg(feature = "srv-discovery")]
pub use resolver::SrvResolver;
pub use resolver::{EndpointResolver, StaticResolver};
pub use version::VersionTracker;
