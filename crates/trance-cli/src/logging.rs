//! Diagnostic logging
//!
//! Logs go to stderr so reports on stdout stay machine-readable.

use std::io::{self, IsTerminal};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "TRANCE_LOG";

/// Install the global subscriber. `TRANCE_LOG` wins over the level implied
/// by `--verbose`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(true),
        )
        .with(filter)
        .try_init();
}
