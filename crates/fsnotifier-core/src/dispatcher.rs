//! Event dispatcher (spec §4.4): consumes normalized events, mutates the
//! tree, and produces the records the engine hands back to its caller.
//!
//! The per-node state machine described in the spec (`Registered` ->
//! `TearingDown` -> `Gone`) is not reified as its own type here: the
//! engine is single-threaded and every teardown runs to completion
//! before the next event is considered (spec §5), so "TearingDown" never
//! outlives a single call to `rm_watch`. A node is simply `Registered`
//! (present in the store) or `Gone` (absent); an event against a handle
//! the store no longer knows about is dropped silently, which is exactly
//! what "unknown handle" dispatch means below.

use std::path::PathBuf;

use bitflags::bitflags;

use crate::error::WalkError;
use crate::ignore::IgnoreList;
use crate::node::NodeId;
use crate::registry::RootRegistry;
use crate::source::{EventSource, Handle, NormalizedEvent};
use crate::store::WatchStore;
use crate::walker;

bitflags! {
    /// Raw event mask handed to the caller alongside a resolved path
    /// (spec §4.4: "invoke the registered callback with (path,
    /// raw_event_mask)"). Mirrors the normalized vocabulary of §4.1
    /// rather than either kernel's native bit layout: by the time an
    /// event reaches here, the dispatcher has already collapsed the two
    /// platform models into one shape.
    pub struct RawEventMask: u32 {
        const SELF_CHANGED   = 0b0000_0001;
        const SELF_GONE      = 0b0000_0010;
        const ATTR_CHANGED   = 0b0000_0100;
        const CHILD_CREATED  = 0b0000_1000;
        const CHILD_REMOVED  = 0b0001_0000;
    }
}

/// One user-visible record produced by dispatching a batch of kernel
/// events (spec §4.4, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRecord {
    /// A newly discovered path, registered during a rewalk. The spec
    /// fixes this record's text form exactly: `CREATE\n<path>\n`; the
    /// core emits it directly rather than routing it through a
    /// caller-supplied callback.
    Create(PathBuf),
    /// Any other structural or metadata event, resolved to an absolute
    /// path plus a mask describing what happened. Textual formatting
    /// (`CHANGE`, `STATS`, ...) is the daemon's concern, not the core's.
    Change { path: PathBuf, mask: RawEventMask },
    /// The kernel's event queue overflowed; some events may have been
    /// lost. Surfaced as its own record rather than folded into
    /// `Change` so callers can format it as a distinguished message
    /// (spec §6: "Overflow is surfaced as a distinguished MESSAGE
    /// record").
    Overflow,
}

/// Dispatches one batch of normalized events (everything `poll()`
/// returned in one call), mutating `store` as a side effect and
/// returning the records the batch produced in kernel-supplied order
/// (spec §5: "events within a single poll() batch are processed in
/// kernel-supplied order").
pub fn dispatch_batch<S: EventSource>(
    source: &mut S,
    store: &mut WatchStore,
    registry: &RootRegistry,
    events: Vec<NormalizedEvent>,
    register_leaves: bool,
) -> Vec<DispatchRecord> {
    let mut out = Vec::new();
    for event in events {
        dispatch_one(source, store, registry, event, register_leaves, &mut out);
    }
    out
}

fn dispatch_one<S: EventSource>(
    source: &mut S,
    store: &mut WatchStore,
    registry: &RootRegistry,
    event: NormalizedEvent,
    register_leaves: bool,
    out: &mut Vec<DispatchRecord>,
) {
    match event {
        NormalizedEvent::Overflow => {
            tracing::warn!("kernel event queue overflowed; events may have been lost");
            out.push(DispatchRecord::Overflow);
        }

        NormalizedEvent::ChildCreated { parent, child_basename, .. } => {
            let Some(parent_id) = store.get_by_handle(parent) else { return };
            let Some(parent_path) = store.arena().path_of(parent_id) else { return };
            let child_path = parent_path.join(&child_basename);
            let Some(ignore) = root_ignore_for(store, registry, parent_id).cloned() else { return };

            match walker::walk(
                source,
                store,
                &child_path,
                Some(parent_id),
                &ignore,
                register_leaves,
                true,
                |p| out.push(DispatchRecord::Create(p.to_path_buf())),
            ) {
                Ok(_) | Err(WalkError::Ignore(_)) => {}
                Err(err) => tracing::warn!(?err, "failed to register newly created child"),
            }
        }

        NormalizedEvent::ChildRemoved { parent, child_basename } => {
            let Some(parent_id) = store.get_by_handle(parent) else { return };
            let Some(parent_path) = store.arena().path_of(parent_id) else { return };
            let child_path = parent_path.join(&child_basename);
            let child_id = store
                .arena()
                .get(parent_id)
                .and_then(|n| n.live_children().find(|c| store.arena().path_of(*c) == Some(child_path.as_path())));

            if let Some(child_id) = child_id {
                walker::rm_watch(source, store, child_id, false);
                store.arena_mut().unlink_child(parent_id, child_id);
            }
        }

        NormalizedEvent::SelfChanged { handle } => {
            let Some(node_id) = store.get_by_handle(handle) else { return };
            let (path, is_dir) = match store.arena().get(node_id) {
                Some(n) => (n.name.clone(), n.is_dir),
                None => return,
            };

            if is_dir {
                if let Some(ignore) = root_ignore_for(store, registry, node_id).cloned() {
                    walker::rewalk_one_level(source, store, node_id, &ignore, register_leaves, |p| {
                        out.push(DispatchRecord::Create(p.to_path_buf()))
                    });
                }
            }

            out.push(DispatchRecord::Change { path, mask: RawEventMask::SELF_CHANGED });
        }

        NormalizedEvent::SelfGone { handle } => {
            let Some(node_id) = store.get_by_handle(handle) else { return };
            let path = store.arena().get(node_id).map(|n| n.name.clone());
            walker::rm_watch(source, store, node_id, true);
            if let Some(path) = path {
                out.push(DispatchRecord::Change { path, mask: RawEventMask::SELF_GONE });
            }
        }

        NormalizedEvent::AttrChanged { handle } => {
            let Some(node_id) = store.get_by_handle(handle) else { return };
            if let Some(node) = store.arena().get(node_id) {
                out.push(DispatchRecord::Change { path: node.name.clone(), mask: RawEventMask::ATTR_CHANGED });
            }
        }
    }
}

/// Walks `node_id`'s parent chain up to its root and returns that root's
/// ignore list, so a rewalk triggered deep in the tree still respects
/// the ignore rules the owning `watch()` call was given (spec §4.4:
/// "the rewalk uses the node's own ignore context").
fn root_ignore_for<'a>(store: &WatchStore, registry: &'a RootRegistry, mut node_id: NodeId) -> Option<&'a IgnoreList> {
    loop {
        let node = store.arena().get(node_id)?;
        match node.parent {
            Some(parent_id) => node_id = parent_id,
            None => return registry.find_by_node(node_id).map(|r| &r.ignore),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore::IgnoreList;
    use std::cell::RefCell;
    use std::io;
    use std::os::unix::io::RawFd;
    use std::path::Path;

    struct FakeSource {
        next: i32,
        unregistered: RefCell<Vec<Handle>>,
    }

    impl FakeSource {
        fn new() -> Self {
            FakeSource { next: 0, unregistered: RefCell::new(Vec::new()) }
        }
    }

    impl EventSource for FakeSource {
        fn init() -> io::Result<Self> {
            Ok(FakeSource::new())
        }

        fn register(&mut self, _path: &Path, _is_dir: bool) -> io::Result<Handle> {
            let h = Handle(self.next);
            self.next += 1;
            Ok(h)
        }

        fn unregister(&mut self, handle: Handle) {
            self.unregistered.borrow_mut().push(handle);
        }

        fn poll(&mut self) -> io::Result<Vec<NormalizedEvent>> {
            Ok(Vec::new())
        }

        fn max_watches(&self) -> Option<usize> {
            Some(1_000_000)
        }

        fn limit_reached(&self) -> bool {
            false
        }

        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    #[test]
    fn child_created_registers_and_emits_create_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub1")).unwrap();

        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let mut registry = RootRegistry::new();
        let ignore = IgnoreList::new(vec![]);

        let root_id = walker::walk(&mut source, &mut store, dir.path(), None, &ignore, false, false, |_| {}).unwrap();
        registry.insert(dir.path().to_path_buf(), ignore, root_id);
        assert_eq!(store.len(), 2);

        let sub1_id = store.arena().get(root_id).unwrap().live_children().next().unwrap();
        let sub1_handle = store.arena().get(sub1_id).unwrap().handle;
        std::fs::create_dir(dir.path().join("sub1/new")).unwrap();

        let events = vec![NormalizedEvent::ChildCreated {
            parent: sub1_handle,
            child_basename: "new".into(),
            child_is_dir: true,
        }];
        let records = dispatch_batch(&mut source, &mut store, &registry, events, false);

        assert_eq!(store.len(), 3);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], DispatchRecord::Create(dir.path().join("sub1/new")));
    }

    #[test]
    fn child_created_for_already_known_child_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub1")).unwrap();

        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let mut registry = RootRegistry::new();
        let ignore = IgnoreList::new(vec![]);

        let root_id = walker::walk(&mut source, &mut store, dir.path(), None, &ignore, false, false, |_| {}).unwrap();
        let root_handle = store.arena().get(root_id).unwrap().handle;
        registry.insert(dir.path().to_path_buf(), ignore, root_id);
        assert_eq!(store.len(), 2);

        let events = vec![NormalizedEvent::ChildCreated {
            parent: root_handle,
            child_basename: "sub1".into(),
            child_is_dir: true,
        }];
        let records = dispatch_batch(&mut source, &mut store, &registry, events, false);
        assert!(records.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn self_gone_tears_down_directory_and_its_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let registry = RootRegistry::new();
        let ignore = IgnoreList::new(vec![]);

        let root_id = walker::walk(&mut source, &mut store, dir.path(), None, &ignore, false, false, |_| {}).unwrap();
        let root_handle = store.arena().get(root_id).unwrap().handle;
        assert_eq!(store.len(), 2);

        let events = vec![NormalizedEvent::SelfGone { handle: root_handle }];
        let records = dispatch_batch(&mut source, &mut store, &registry, events, false);
        assert_eq!(store.len(), 0);
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], DispatchRecord::Change { mask, .. } if *mask == RawEventMask::SELF_GONE));
    }

    #[test]
    fn unknown_handle_is_dropped_silently() {
        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let registry = RootRegistry::new();

        let events = vec![NormalizedEvent::AttrChanged { handle: Handle(999) }];
        let records = dispatch_batch(&mut source, &mut store, &registry, events, false);
        assert!(records.is_empty());
    }
}
