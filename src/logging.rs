//! Subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, RoadError};

/// Installs a global fmt subscriber.
///
/// `level` takes an `EnvFilter` directive such as `debug` or
/// `roadstore::cache=trace`. Without one, `RUST_LOG` is used, then `warn`.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| RoadError::InvalidState(format!("invalid log level: {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| RoadError::invalid_state("logging already initialized"))
}
