//! Tracing subscriber setup for binaries embedding the job core.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the process.

use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{JobError, JobResult};

const DEFAULT_FILTER: &str = "domain_job=info";

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the default filter and `LOG_FORMAT=json` switches to
/// JSON output.
pub fn init() -> JobResult<()> {
    init_with_default_filter(DEFAULT_FILTER)
}

pub fn init_with_default_filter(default_filter: &str) -> JobResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json_requested() {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| JobError::config(format!("Failed to install tracing subscriber: {e}")))
}

fn json_requested() -> bool {
    env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"))
}
