//! Vigil CLI support: tracing setup and service wiring shared by the `vigil` binary.

pub mod setup;

use std::env;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "vigil=info";

/// Whether `LOG_FORMAT` asks for JSON lines.
pub fn json_logs_requested(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Initialize tracing for the CLI. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json_logs_requested(env::var("LOG_FORMAT").ok().as_deref()) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init();
    }
}
