use std::path::{Path, PathBuf};

use crate::source::Handle;

/// A stable index into the node arena. Used in place of a pointer or
/// reference-counted back-reference so that a child's `parent` link does
/// not need to own or outlive its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One watched filesystem object.
///
/// `children` is sparse and non-compacting: a removed child's slot is
/// cleared to `None` rather than shifting subsequent entries, because the
/// dispatcher may be iterating the same array (via an event that touches
/// one sibling) while another sibling is concurrently being torn down by
/// a different event in the same batch.
#[derive(Debug)]
pub struct WatchNode {
    pub name: PathBuf,
    pub handle: Handle,
    pub is_dir: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<Option<NodeId>>,
}

impl WatchNode {
    fn new(name: PathBuf, handle: Handle, is_dir: bool, parent: Option<NodeId>) -> Self {
        WatchNode {
            name,
            handle,
            is_dir,
            parent,
            children: Vec::new(),
        }
    }

    /// Index of the child slot holding `child`, if any live slot matches.
    pub fn find_child_slot(&self, child: NodeId) -> Option<usize> {
        self.children.iter().position(|slot| *slot == Some(child))
    }

    pub fn live_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(|slot| *slot)
    }
}

/// Arena owning every live `WatchNode`. Slots are tombstoned (`None`) on
/// removal rather than compacted, for the same reason a node's own
/// `children` array is sparse: a `NodeId` must stay valid for the
/// lifetime of the node it names, even while siblings come and go.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<WatchNode>>,
    free: Vec<usize>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena::default()
    }

    pub fn insert(&mut self, name: PathBuf, handle: Handle, is_dir: bool, parent: Option<NodeId>) -> NodeId {
        let node = WatchNode::new(name, handle, is_dir, parent);
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(node);
            NodeId(idx)
        } else {
            self.slots.push(Some(node));
            NodeId(self.slots.len() - 1)
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&WatchNode> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut WatchNode> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Append `child` into `parent`'s sparse child array, reusing a
    /// tombstoned slot when one is available.
    pub fn link_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.get_mut(parent) {
            if let Some(slot) = node.children.iter_mut().find(|s| s.is_none()) {
                *slot = Some(child);
            } else {
                node.children.push(Some(child));
            }
        }
    }

    /// Clear `child`'s slot in `parent`'s child array, if present.
    pub fn unlink_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.get_mut(parent) {
            if let Some(idx) = node.find_child_slot(child) {
                node.children[idx] = None;
            }
        }
    }

    /// Free `id`'s slot. Does not touch the parent's child array; callers
    /// that need the parent updated must call `unlink_child` separately
    /// (the tree walker's teardown intentionally skips this for
    /// recursive, non-top-level removals — see `rm_watch`).
    pub fn remove(&mut self, id: NodeId) -> Option<WatchNode> {
        let removed = self.slots.get_mut(id.0).and_then(|slot| slot.take());
        if removed.is_some() {
            self.free.push(id.0);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute path a node would report; recomputed from `name` rather
    /// than stitched from parents, since `name` is already fully
    /// qualified (see the data-model invariant in the module docs).
    pub fn path_of(&self, id: NodeId) -> Option<&Path> {
        self.get(id).map(|n| n.name.as_path())
    }
}

/// A user-requested watched subtree.
#[derive(Debug)]
pub struct Root {
    pub root_path: PathBuf,
    pub ignore: crate::ignore::IgnoreList,
    pub root_node: NodeId,
}
