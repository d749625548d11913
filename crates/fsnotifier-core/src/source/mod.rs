#[cfg(target_os = "linux")]
mod inotify_source;
#[cfg(any(
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "macos",
    target_os = "dragonfly"
))]
mod kqueue_source;

#[cfg(target_os = "linux")]
pub use inotify_source::InotifySource;
#[cfg(any(
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "macos",
    target_os = "dragonfly"
))]
pub use kqueue_source::KqueueSource;

use std::os::unix::io::RawFd;
use std::path::Path;

/// Opaque identifier for one live kernel registration. Wraps a raw
/// integer rather than the kernel-specific descriptor type so the rest
/// of the engine never needs to know which backend is compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub i32);

/// The engine's normalized event vocabulary (spec §4.1). Each backend
/// translates whatever the kernel hands it into this small set before
/// the event ever reaches the dispatcher.
#[derive(Debug, Clone)]
pub enum NormalizedEvent {
    /// Inode-event model only: the kernel named the child directly.
    ChildCreated {
        parent: Handle,
        child_basename: std::ffi::OsString,
        child_is_dir: bool,
    },
    /// Inode-event model only.
    ChildRemoved {
        parent: Handle,
        child_basename: std::ffi::OsString,
    },
    /// A directory's contents changed but the kernel did not name the
    /// child (vnode model: write/extend/link on a directory).
    SelfChanged { handle: Handle },
    /// The watched object is gone: deleted, renamed away, or revoked.
    SelfGone { handle: Handle },
    /// Metadata changed; no structural mutation follows.
    AttrChanged { handle: Handle },
    /// The kernel's event queue overflowed; some events may be lost.
    Overflow,
}

/// The four-operation contract every kernel backend must provide (spec
/// §4.1). Implemented once per platform and selected entirely at
/// compile time; the tree walker and dispatcher never branch on
/// platform and only ever see this trait.
pub trait EventSource {
    /// Opens the kernel event channel and discovers the platform's
    /// watch-count ceiling, if one is advertised.
    fn init() -> std::io::Result<Self>
    where
        Self: Sized;

    /// Registers `path` for the union of events this crate cares about.
    /// `Err` signals a per-path registration failure, which the walker
    /// maps to `ERR_CONTINUE`; there is no distinct fatal-channel variant
    /// at this layer (a fatal channel failure instead surfaces from
    /// `poll`).
    fn register(&mut self, path: &Path, is_dir: bool) -> std::io::Result<Handle>;

    /// Best-effort; failures are logged by the implementation and never
    /// propagated (spec §7: "closing a descriptor that is already
    /// invalid is logged at warning level, never propagated").
    fn unregister(&mut self, handle: Handle);

    /// Blocks until at least one event is available, then drains
    /// whatever the kernel supplies in one call.
    fn poll(&mut self) -> std::io::Result<Vec<NormalizedEvent>>;

    /// Maximum number of simultaneously live registrations this source
    /// will permit, if known.
    fn max_watches(&self) -> Option<usize>;

    /// One-way signal: true once a registration has failed due to quota
    /// exhaustion (spec §5, "limit reached").
    fn limit_reached(&self) -> bool;

    /// The raw descriptor backing the kernel event channel, for
    /// multiplexing in the daemon's event loop (spec §5).
    fn as_raw_fd(&self) -> RawFd;
}
