//! BSD/macOS backend: the kernel's kqueue vnode-event API. Unlike
//! inotify, each watched object needs its own descriptor, and a
//! directory's event never names the child that changed — the caller
//! (the dispatcher, via a rewalk) is responsible for discovering which
//! child appeared or vanished.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kqueue::{EventData, EventFilter, FilterFlag, Ident, Vnode, Watcher};

use super::{EventSource, Handle, NormalizedEvent};
use crate::walker::LeafPolicy;

/// kqueue has no administrator-exposed watch-count ceiling comparable to
/// inotify's; the spec's default applies (§6: "otherwise a built-in
/// ceiling of 1,000,000 is assumed").
const DEFAULT_MAX_WATCHES: usize = 1_000_000;

fn filter_flags() -> FilterFlag {
    FilterFlag::NOTE_DELETE
        | FilterFlag::NOTE_WRITE
        | FilterFlag::NOTE_EXTEND
        | FilterFlag::NOTE_ATTRIB
        | FilterFlag::NOTE_LINK
        | FilterFlag::NOTE_RENAME
        | FilterFlag::NOTE_REVOKE
}

pub struct KqueueSource {
    watcher: Watcher,
    next_id: i32,
    by_handle: HashMap<Handle, PathBuf>,
    by_path: HashMap<PathBuf, Handle>,
    limit_reached: bool,
}

impl KqueueSource {
    fn alloc_handle(&mut self, path: PathBuf) -> Handle {
        let handle = Handle(self.next_id);
        self.next_id += 1;
        self.by_handle.insert(handle, path.clone());
        self.by_path.insert(path, handle);
        handle
    }
}

impl EventSource for KqueueSource {
    fn init() -> io::Result<Self> {
        let watcher = Watcher::new()?;
        Ok(KqueueSource {
            watcher,
            next_id: 0,
            by_handle: HashMap::new(),
            by_path: HashMap::new(),
            limit_reached: false,
        })
    }

    fn register(&mut self, path: &Path, _is_dir: bool) -> io::Result<Handle> {
        if let Err(err) = self.watcher.add_filename(path, EventFilter::EVFILT_VNODE, filter_flags()) {
            if err.kind() == io::ErrorKind::Other {
                // kqueue has no distinguished "too many descriptors"
                // error from add_filename itself; EMFILE surfaces from
                // the subsequent `watch()` syscall instead, so the real
                // signal is caught there (see below).
            }
            return Err(err);
        }
        if let Err(err) = self.watcher.watch() {
            if err.raw_os_error() == Some(libc::EMFILE) || err.raw_os_error() == Some(libc::ENFILE) {
                self.limit_reached = true;
            }
            return Err(err);
        }
        Ok(self.alloc_handle(path.to_path_buf()))
    }

    fn unregister(&mut self, handle: Handle) {
        if let Some(path) = self.by_handle.remove(&handle) {
            self.by_path.remove(&path);
            if let Err(err) = self.watcher.remove_filename(&path, EventFilter::EVFILT_VNODE) {
                tracing::warn!(?err, path = %path.display(), "failed to remove kqueue watch");
            }
        }
    }

    fn poll(&mut self) -> io::Result<Vec<NormalizedEvent>> {
        let mut out = Vec::new();
        // Block for the first event, then drain whatever else is ready
        // without blocking, matching "blocks until at least one event is
        // available, then drains whatever the kernel supplies" (spec
        // §4.1).
        if let Some(event) = self.watcher.poll(None) {
            if let Some(normalized) = self.translate(event) {
                out.push(normalized);
            }
        }
        while let Some(event) = self.watcher.poll(Some(Duration::from_secs(0))) {
            if let Some(normalized) = self.translate(event) {
                out.push(normalized);
            }
        }
        Ok(out)
    }

    fn max_watches(&self) -> Option<usize> {
        Some(DEFAULT_MAX_WATCHES)
    }

    fn limit_reached(&self) -> bool {
        self.limit_reached
    }

    fn as_raw_fd(&self) -> RawFd {
        self.watcher.as_raw_fd()
    }
}

impl LeafPolicy for KqueueSource {
    // Every watched object needs its own descriptor on this model, and a
    // directory's vnode event never names which child changed, so leaf
    // entries must be registered individually to be observable at all
    // (spec §4.3 step 5).
    const REGISTER_LEAVES: bool = true;
}

impl KqueueSource {
    fn translate(&self, event: kqueue::Event) -> Option<NormalizedEvent> {
        let path = match event.ident {
            Ident::Filename(_, ref path) => PathBuf::from(path),
            _ => return None,
        };
        let handle = *self.by_path.get(&path)?;
        let vnode = match event.data {
            EventData::Vnode(vnode) => vnode,
            _ => return None,
        };
        // One kevent, one normalized event, even though several NOTE_*
        // bits can be set at once: `vnode` here is already a single
        // resolved variant, not a bitset, so there is nothing further
        // to coalesce (see DESIGN.md's resolution of the duplicate-bit
        // Open Question).
        Some(match vnode {
            Vnode::Delete | Vnode::Revoke => NormalizedEvent::SelfGone { handle },
            // The vnode API does not report a rename's new name; we
            // treat a rename as a removal and rely on the parent
            // directory's own write notification to trigger rediscovery
            // if the item is still within a watched subtree (DESIGN.md).
            Vnode::Rename => NormalizedEvent::SelfGone { handle },
            Vnode::Write | Vnode::Extend | Vnode::Truncate | Vnode::Link => {
                NormalizedEvent::SelfChanged { handle }
            }
            Vnode::Attrib => NormalizedEvent::AttrChanged { handle },
            // `Vnode` is non-exhaustive (e.g. `Open`/`CloseWrite`/`Close`
            // on FreeBSD); none of those map to anything the engine acts
            // on, so they're dropped rather than normalized.
            _ => return None,
        })
    }
}
