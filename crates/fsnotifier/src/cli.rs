//! Process-level argument parsing (spec §12). The daemon accepts no
//! positional configuration of roots: those arrive exclusively over the
//! line protocol from the controlling parent process (spec §6). The
//! only flags are process-wide knobs that make sense before any root is
//! known.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "fsnotifier", about = "Filesystem-change notifier daemon", version)]
pub struct Cli {
    /// Initial tracing filter; overridable at runtime by RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
