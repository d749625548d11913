use std::path::PathBuf;

use crate::ignore::IgnoreList;
use crate::node::{NodeId, Root};

/// The set of user-requested roots (spec §4.5). Provides the entry
/// points for `watch`/`unwatch` and the root-level duplicate check the
/// walker consults when `parent` is `None`.
#[derive(Default)]
pub struct RootRegistry {
    roots: Vec<Root>,
}

impl RootRegistry {
    pub fn new() -> Self {
        RootRegistry::default()
    }

    pub fn insert(&mut self, root_path: PathBuf, ignore: IgnoreList, root_node: NodeId) {
        self.roots.push(Root { root_path, ignore, root_node });
    }

    pub fn find_by_node(&self, node: NodeId) -> Option<&Root> {
        self.roots.iter().find(|r| r.root_node == node)
    }

    pub fn remove_by_node(&mut self, node: NodeId) -> Option<Root> {
        let idx = self.roots.iter().position(|r| r.root_node == node)?;
        Some(self.roots.remove(idx))
    }

    pub fn find_existing_root(&self, path: &std::path::Path) -> Option<NodeId> {
        self.roots.iter().find(|r| r.root_path == path).map(|r| r.root_node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Root> {
        self.roots.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
