use std::collections::HashMap;
use std::path::PathBuf;

use crate::node::{NodeArena, NodeId};
use crate::source::Handle;

/// Fixed-capacity mapping from kernel handle to `NodeId`, sized at
/// initialization to the permitted maximum (spec §4.2). The node arena
/// is owned here too, since the store is the only thing that needs both
/// the handle index and the parent-owned arena to stay consistent with
/// each other.
pub struct WatchStore {
    arena: NodeArena,
    by_handle: HashMap<Handle, NodeId>,
    max_watches: usize,
}

impl WatchStore {
    pub fn new(max_watches: usize) -> Self {
        WatchStore {
            arena: NodeArena::new(),
            by_handle: HashMap::new(),
            max_watches,
        }
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn is_full(&self) -> bool {
        self.by_handle.len() >= self.max_watches
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Inserts a freshly registered node. Returns `None` if the store is
    /// already at capacity; the caller is expected to unregister the
    /// kernel watch it just made in that case.
    pub fn put(&mut self, name: PathBuf, handle: Handle, is_dir: bool, parent: Option<NodeId>) -> Option<NodeId> {
        if self.is_full() {
            return None;
        }
        let id = self.arena.insert(name, handle, is_dir, parent);
        self.by_handle.insert(handle, id);
        Some(id)
    }

    pub fn get_by_handle(&self, handle: Handle) -> Option<NodeId> {
        self.by_handle.get(&handle).copied()
    }

    /// Removes the node for `handle` from both indices, returning the
    /// freed node's `NodeId` and its own `handle`/`parent` for the
    /// caller's teardown bookkeeping. Does not touch the parent's child
    /// array (see `NodeArena::remove`).
    pub fn clear(&mut self, handle: Handle) -> Option<NodeId> {
        let id = self.by_handle.remove(&handle)?;
        self.arena.remove(id);
        Some(id)
    }

    pub fn destroy_all(&mut self) {
        self.by_handle.clear();
        self.arena = NodeArena::new();
    }
}
