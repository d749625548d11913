use std::fs;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};
use walkdir::WalkDir;

use crate::error::WalkError;
use crate::ignore::IgnoreList;
use crate::node::NodeId;
use crate::source::{EventSource, Handle};
use crate::store::WatchStore;

/// Whether leaf (non-directory) entries get their own kernel
/// registration. On the inode model a directory's own watch already
/// reports events for its children, so leaves are not registered
/// individually; on the vnode model every watched object needs its own
/// descriptor, so leaves must be registered too (spec §4.3 step 5).
pub trait LeafPolicy {
    const REGISTER_LEAVES: bool;
}

/// Registers `path` and, if it is a directory, recursively registers its
/// non-ignored children (spec §4.3). `parent` is `None` for a
/// newly requested root. `emit_create` controls whether a `CREATE`
/// record is produced for the registrations made during this call — the
/// initial `watch()` does not emit one, but a rewalk triggered by a
/// directory-change event does (spec §6).
#[allow(clippy::too_many_arguments)]
pub fn walk<S: EventSource>(
    source: &mut S,
    store: &mut WatchStore,
    path: &Path,
    parent: Option<NodeId>,
    ignore: &IgnoreList,
    register_leaves: bool,
    emit_create: bool,
    mut on_create: impl FnMut(&Path),
) -> Result<NodeId, WalkError> {
    if ignore.matches(path) {
        return Err(WalkError::Ignore(path.to_path_buf()));
    }

    if let Some(existing) = find_existing_child(store, parent, path) {
        return Ok(existing);
    }

    let metadata = match fs::symlink_metadata(path).and_then(|m| {
        if m.file_type().is_symlink() {
            fs::metadata(path)
        } else {
            Ok(m)
        }
    }) {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(WalkError::Ignore(path.to_path_buf()));
        }
        Err(err) => {
            trace!(?err, path = %path.display(), "path vanished before it could be walked");
            return Err(WalkError::Ignore(path.to_path_buf()));
        }
    };
    let is_dir = metadata.is_dir();

    // Non-root leaves are implicitly covered by the parent directory's own
    // watch on the inode model, so they're skipped; a flat (file) root is
    // always registered regardless of the platform's leaf policy (spec
    // §8, boundary behavior: "Flat (file) root").
    if !is_dir && !register_leaves && parent.is_some() {
        return Err(WalkError::Ignore(path.to_path_buf()));
    }

    let node_id = register_node(source, store, path, is_dir, parent)?;

    if let Some(parent_id) = parent {
        store.arena_mut().link_child(parent_id, node_id);
    }

    if emit_create {
        on_create(path);
    }

    if !is_dir {
        return Ok(node_id);
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(?err, path = %path.display(), "failed to read directory during walk");
            return Ok(node_id);
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(?err, path = %path.display(), "failed to read directory entry");
                continue;
            }
        };
        let child_path = entry.path();
        match walk(
            source,
            store,
            &child_path,
            Some(node_id),
            ignore,
            register_leaves,
            emit_create,
            &mut on_create,
        ) {
            Ok(_) => {}
            Err(WalkError::Ignore(_)) => continue,
            Err(err @ WalkError::Continue { .. }) => {
                warn!(?err, "transient failure registering child, continuing with siblings");
                continue;
            }
            Err(err @ WalkError::Abort { .. }) => {
                rm_watch(source, store, node_id, false);
                return Err(err);
            }
        }
    }

    Ok(node_id)
}

fn find_existing_child(store: &WatchStore, parent: Option<NodeId>, path: &Path) -> Option<NodeId> {
    let parent_id = parent?;
    let node = store.arena().get(parent_id)?;
    node.live_children()
        .find(|child| store.arena().path_of(*child) == Some(path))
}

fn register_node<S: EventSource>(
    source: &mut S,
    store: &mut WatchStore,
    path: &Path,
    is_dir: bool,
    parent: Option<NodeId>,
) -> Result<NodeId, WalkError> {
    if store.is_full() {
        return Err(WalkError::Continue {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "watch-node store is full"),
        });
    }
    let handle = source
        .register(path, is_dir)
        .map_err(|err| WalkError::Continue { path: path.to_path_buf(), source: err })?;
    store
        .put(path.to_path_buf(), handle, is_dir, parent)
        .ok_or_else(|| {
            source.unregister(handle);
            WalkError::Continue {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "watch-node store is full"),
            }
        })
}

/// Canonicalizes `root` and walks it as a fresh root (spec §4.3,
/// `watch(root, ignore_list)`).
pub fn watch_root<S: EventSource>(
    source: &mut S,
    store: &mut WatchStore,
    root: &Path,
    ignore: &IgnoreList,
    register_leaves: bool,
) -> Result<(PathBuf, NodeId), WalkError> {
    let canonical = fs::canonicalize(root).map_err(|err| WalkError::Continue {
        path: root.to_path_buf(),
        source: err,
    })?;
    let id = walk(source, store, &canonical, None, ignore, register_leaves, false, |_| {})?;
    Ok((canonical, id))
}

/// Recursively unregisters `node`'s subtree, visiting children before
/// the node itself (spec §4.3: "the recursive teardown must visit
/// children before closing the parent handle"). `update_parent`
/// controls whether the node's own slot in its parent's child array is
/// cleared; recursive calls pass `false` to avoid a quadratic scan
/// during whole-subtree teardown.
pub fn rm_watch<S: EventSource>(source: &mut S, store: &mut WatchStore, node: NodeId, update_parent: bool) {
    let (handle, parent, children) = match store.arena().get(node) {
        Some(n) => (n.handle, n.parent, n.live_children().collect::<Vec<_>>()),
        None => return,
    };

    source.unregister(handle);

    for child in children {
        rm_watch(source, store, child, false);
    }

    if update_parent {
        if let Some(parent_id) = parent {
            store.arena_mut().unlink_child(parent_id, node);
        }
    }

    store.clear(handle);
}

/// Walks directory entries via `walkdir` to synthesize an initial tree
/// non-recursively without re-entering `walk`'s own recursion — used by
/// the dispatcher's rewalk when only shallow, single-level discovery is
/// needed (e.g. the vnode model's directory-write rewalk, where only
/// direct children are new). Kept separate from `walk` because `walk`
/// always recurses fully; a rewalk only needs to re-examine the one
/// directory whose `SelfChanged` fired, and `walk`'s own dedup against
/// existing children already makes deeper recursion a no-op for
/// anything previously seen.
pub fn rewalk_one_level<S: EventSource>(
    source: &mut S,
    store: &mut WatchStore,
    dir_node: NodeId,
    ignore: &IgnoreList,
    register_leaves: bool,
    mut on_create: impl FnMut(&Path),
) {
    let dir_path = match store.arena().path_of(dir_node) {
        Some(p) => p.to_path_buf(),
        None => return,
    };
    for entry in WalkDir::new(&dir_path).max_depth(1).follow_links(false).into_iter().flatten() {
        let child_path = entry.path().to_path_buf();
        if child_path == dir_path {
            continue;
        }
        match walk(
            source,
            store,
            &child_path,
            Some(dir_node),
            ignore,
            register_leaves,
            true,
            &mut on_create,
        ) {
            Ok(_) | Err(WalkError::Ignore(_)) => {}
            Err(err) => warn!(?err, "rewalk failed for child"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::NormalizedEvent;
    use std::cell::RefCell;
    use std::io;
    use std::os::unix::io::RawFd;

    /// A fake event source used only to exercise the walker's own
    /// bookkeeping (dedup, ignore short-circuit, teardown order)
    /// without depending on a real kernel channel.
    struct FakeSource {
        next: i32,
        unregistered: RefCell<Vec<Handle>>,
    }

    impl FakeSource {
        fn new() -> Self {
            FakeSource {
                next: 0,
                unregistered: RefCell::new(Vec::new()),
            }
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
    fn walk_registers_tree_and_skips_ignored_subtree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub1")).unwrap();
        std::fs::create_dir(dir.path().join("sub2")).unwrap();
        std::fs::create_dir(dir.path().join("ignored")).unwrap();

        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let ignore = IgnoreList::new(vec![dir.path().join("ignored").to_string_lossy().into_owned()]);

        let mut created = Vec::new();
        let id = walk(&mut source, &mut store, dir.path(), None, &ignore, false, false, |p| {
            created.push(p.to_path_buf());
        })
        .unwrap();

        assert_eq!(store.len(), 3);
        assert!(created.is_empty());
        assert!(store.arena().get(id).unwrap().is_dir);
    }

    #[test]
    fn rm_watch_tears_down_children_before_parent_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let ignore = IgnoreList::new(vec![]);
        let root_id = walk(&mut source, &mut store, dir.path(), None, &ignore, false, false, |_| {}).unwrap();
        assert_eq!(store.len(), 2);

        rm_watch(&mut source, &mut store, root_id, true);
        assert_eq!(store.len(), 0);
        assert_eq!(source.unregistered.borrow().len(), 2);
    }

    #[test]
    fn rewalk_dedups_against_existing_child() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut source = FakeSource::new();
        let mut store = WatchStore::new(1_000_000);
        let ignore = IgnoreList::new(vec![]);

        let root_id = walk(&mut source, &mut store, dir.path(), None, &ignore, false, false, |_| {}).unwrap();
        assert_eq!(store.len(), 2);

        // Simulate a rewalk of the same directory: walking the known
        // child again must return the same NodeId and must not create a
        // second registration.
        let sub_path = dir.path().join("sub");
        let mut created = Vec::new();
        let again = walk(
            &mut source,
            &mut store,
            &sub_path,
            Some(root_id),
            &ignore,
            false,
            true,
            |p| created.push(p.to_path_buf()),
        )
        .unwrap();

        assert_eq!(store.len(), 2);
        assert!(created.is_empty());
        let known_child = store.arena().get(root_id).unwrap().live_children().next().unwrap();
        assert_eq!(again, known_child);
    }
}
