//! Filesystem-change notifier watch-tree engine.
//!
//! This crate is the core described by the specification it implements:
//! recursive discovery, mirroring, and maintenance of a tree of kernel
//! watch registrations under either of two kernel event models (a
//! recursive inode-event API, or a per-descriptor vnode-event API),
//! with the creation bursts, deletions, renames, ignore rules,
//! descriptor exhaustion, and symlink normalization that entails. The
//! line-oriented command protocol with the controlling parent process,
//! logging, and process wiring live in the `fsnotifier` binary crate;
//! this crate exposes only `Engine` and the types needed to drive it.

pub mod dispatcher;
pub mod error;
pub mod ignore;
pub mod node;
pub mod registry;
pub mod source;
pub mod store;
pub mod walker;

pub use dispatcher::{DispatchRecord, RawEventMask};
pub use error::{EngineError, WalkError};
pub use ignore::IgnoreList;
pub use node::NodeId;
pub use source::{EventSource, Handle, NormalizedEvent};
pub use walker::LeafPolicy;

use std::fs;
use std::os::unix::io::RawFd;
use std::path::Path;

use tracing::instrument;

use crate::registry::RootRegistry;
use crate::store::WatchStore;

/// Owns the event source adapter, the watch-node store, and the root
/// registry behind the single entry point the daemon drives (spec §9:
/// "the Rust implementation packages all of it as fields of an owning
/// Engine struct with no global statics", so embedding it in a larger
/// process never requires a redesign).
///
/// `S` is fixed at compile time to whichever backend the target
/// platform supports (`InotifySource` or `KqueueSource`); the engine
/// itself never branches on platform.
pub struct Engine<S: EventSource + LeafPolicy> {
    source: S,
    store: WatchStore,
    roots: RootRegistry,
}

impl<S: EventSource + LeafPolicy> Engine<S> {
    /// Opens the kernel event channel and sizes the watch-node store to
    /// the platform's advertised (or assumed) maximum (spec §4.1
    /// `init()`, §4.2).
    pub fn new() -> Result<Self, EngineError> {
        let source = S::init().map_err(EngineError::SourceInit)?;
        let max_watches = source.max_watches().unwrap_or(1_000_000);
        Ok(Engine {
            source,
            store: WatchStore::new(max_watches),
            roots: RootRegistry::new(),
        })
    }

    /// The raw descriptor backing the kernel event channel, so the
    /// daemon can multiplex it alongside the command input stream (spec
    /// §5).
    pub fn as_raw_fd(&self) -> RawFd {
        self.source.as_raw_fd()
    }

    /// One-way signal: true once a registration has failed due to the
    /// platform's watch-count quota being exhausted (spec §5, "limit
    /// reached").
    pub fn limit_reached(&self) -> bool {
        self.source.limit_reached()
    }

    /// Number of live watch registrations currently held.
    pub fn watch_count(&self) -> usize {
        self.store.len()
    }

    /// Registers a new root (spec §4.3 `watch(root, ignore_list)`):
    /// canonicalizes `root`, walks it recursively, and records it in the
    /// root registry. Watching a path that is already a registered root
    /// (after canonicalization) is idempotent and returns the existing
    /// handle rather than creating a duplicate registration (spec §4.5).
    ///
    /// The initial walk never emits `CREATE` records (spec §6): only a
    /// rewalk triggered by a later directory-change event does.
    #[instrument(name = "watch_root", skip(self, ignore_rules), fields(root = %root.display(), ignore_count = ignore_rules.len()))]
    pub fn watch(&mut self, root: &Path, ignore_rules: Vec<String>) -> Result<Handle, EngineError> {
        if let Ok(canonical) = fs::canonicalize(root) {
            if let Some(existing) = self.roots.find_existing_root(&canonical) {
                let node = self
                    .store
                    .arena()
                    .get(existing)
                    .expect("a root tracked by the registry must still be live in the arena");
                return Ok(node.handle);
            }
        }

        let ignore = IgnoreList::new(ignore_rules);
        let (canonical, node_id) =
            walker::watch_root(&mut self.source, &mut self.store, root, &ignore, S::REGISTER_LEAVES)?;
        let handle = self
            .store
            .arena()
            .get(node_id)
            .expect("just-registered node must be present in the arena")
            .handle;
        self.roots.insert(canonical, ignore, node_id);
        Ok(handle)
    }

    /// Tears down a previously watched root (spec §4.3 `unwatch(handle)`
    /// -> `rm_watch(handle, update_parent=true)`). Unknown handles are
    /// reported as an error rather than absorbed, since `unwatch` is
    /// always externally initiated against a handle the caller was
    /// itself given by `watch` (spec §4.5).
    pub fn unwatch(&mut self, handle: Handle) -> Result<(), EngineError> {
        let node_id = self
            .store
            .get_by_handle(handle)
            .ok_or(EngineError::UnknownHandle(handle))?;
        self.roots.remove_by_node(node_id);
        walker::rm_watch(&mut self.source, &mut self.store, node_id, true);
        Ok(())
    }

    /// Blocks until at least one kernel event is available, drains the
    /// whole batch, and dispatches it against the tree (spec §4.1
    /// `poll()`, §4.4). Returns the records the batch produced, in
    /// kernel-supplied order.
    #[instrument(name = "dispatch_batch", skip(self), fields(batch_len = tracing::field::Empty))]
    pub fn poll(&mut self) -> Result<Vec<DispatchRecord>, EngineError> {
        let events = self.source.poll().map_err(EngineError::PollFailed)?;
        tracing::Span::current().record("batch_len", events.len());
        Ok(dispatcher::dispatch_batch(
            &mut self.source,
            &mut self.store,
            &self.roots,
            events,
            S::REGISTER_LEAVES,
        ))
    }

    /// Tears down every registered root. Used on a fatal kernel-channel
    /// error or shutdown command (spec §5: "a fatal error triggers
    /// close and process exit without graceful per-root teardown"); this
    /// method performs the graceful variant for an orderly exit command,
    /// the OS reclaims descriptors regardless on process exit.
    pub fn close(&mut self) {
        let roots: Vec<NodeId> = self.roots.iter().map(|r| r.root_node).collect();
        for root_node in roots {
            walker::rm_watch(&mut self.source, &mut self.store, root_node, false);
        }
        self.store.destroy_all();
    }
}
