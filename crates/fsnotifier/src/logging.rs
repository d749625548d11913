//! Logging setup (spec §10). A single `tracing-subscriber` `fmt` layer
//! writes to stderr; stdout is reserved exclusively for the line
//! protocol and must never carry a log line. The filter defaults to
//! `info`, overridable by `RUST_LOG` or the binary's `--log-level` flag,
//! in that order of precedence.

use tracing_subscriber::EnvFilter;

pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
