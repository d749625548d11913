use std::path::PathBuf;

use thiserror::Error;

/// Outcome of attempting to register a single path during a walk.
///
/// `Ignore` is absorbed internally by the walker and never escapes the
/// crate's public API; it is a variant here only because the walker's
/// recursive helpers need a uniform return type.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("path ignored: {0}")]
    Ignore(PathBuf),

    #[error("failed to watch {path}: {source}")]
    Continue {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fatal error walking {path}: {source}")]
    Abort {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WalkError {
    pub fn is_ignore(&self) -> bool {
        matches!(self, WalkError::Ignore(_))
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, WalkError::Abort { .. })
    }
}

/// Errors that can escape the engine's public API (`watch`/`unwatch`).
///
/// `ERR_IGNORE` conditions never reach here; they are resolved inside the
/// walker.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to register {path}: {source}")]
    Registration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fatal error watching {path}: {source}")]
    Fatal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watch-node store is full (max {max} watches)")]
    StoreFull { max: usize },

    #[error("event source initialization failed: {0}")]
    SourceInit(#[source] std::io::Error),

    #[error("no such watch handle: {0:?}")]
    UnknownHandle(crate::source::Handle),

    #[error("fatal error polling kernel event channel: {0}")]
    PollFailed(#[source] std::io::Error),
}

impl From<WalkError> for EngineError {
    fn from(err: WalkError) -> Self {
        match err {
            WalkError::Ignore(path) => EngineError::Registration {
                path,
                source: std::io::Error::new(std::io::ErrorKind::Other, "ignored path reached engine boundary"),
            },
            WalkError::Continue { path, source } => EngineError::Registration { path, source },
            WalkError::Abort { path, source } => EngineError::Fatal { path, source },
        }
    }
}
