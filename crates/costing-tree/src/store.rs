//! Canonical in-memory node index.
//!
//! This is the storage boundary for `costing-tree`:
//! - load/store JSONL
//! - deterministic tree queries (children, subtrees, roots)
//! - group-flag recomputation and key allocation

use crate::jsonl::{JsonlError, read_records_from_path, write_records_to_path};
use crate::node::WbsNode;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

pub const DEFAULT_KEY_PREFIX: &str = "WBS-";

/// Errors raised while loading or querying the node store.
#[derive(Debug, thiserror::Error)]
pub enum NodeStoreError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: BTreeMap<String, WbsNode>,
    next_serial: u64,
}

impl NodeStore {
    /// Build a store from materialized nodes. Duplicate keys: last write wins.
    pub fn from_nodes(nodes: Vec<WbsNode>) -> Self {
        let mut store = Self::default();
        for node in nodes {
            store.upsert(node);
        }
        store
    }

    /// Load store state from a JSONL file. A missing file yields an empty store.
    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, NodeStoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::from_nodes(read_records_from_path(path)?))
    }

    /// Persist store state to a JSONL file.
    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), NodeStoreError> {
        let nodes: Vec<&WbsNode> = self.nodes.values().collect();
        write_records_to_path(path, &nodes)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &str) -> Option<&WbsNode> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: &str) -> Option<&mut WbsNode> {
        self.nodes.get_mut(key)
    }

    /// Insert or replace a node by key. Returns the previous value if present.
    pub fn upsert(&mut self, node: WbsNode) -> Option<WbsNode> {
        if let Some(serial) = key_serial(&node.key) {
            self.next_serial = self.next_serial.max(serial + 1);
        }
        self.nodes.insert(node.key.clone(), node)
    }

    /// Iterate all nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &WbsNode> {
        self.nodes.values()
    }

    /// Iterate nodes of one tree in key order.
    pub fn tree_nodes<'a>(&'a self, tree: &'a str) -> impl Iterator<Item = &'a WbsNode> + 'a {
        self.nodes.values().filter(move |node| node.tree == tree)
    }

    /// Distinct tree identifiers.
    pub fn trees(&self) -> BTreeSet<String> {
        self.nodes.values().map(|node| node.tree.clone()).collect()
    }

    pub fn find_by_code(&self, tree: &str, code: &str) -> Option<&WbsNode> {
        self.nodes
            .values()
            .find(|node| node.tree == tree && node.structural_code == code)
    }

    /// Direct children of `parent` in key order. `None` lists roots.
    pub fn children_of(&self, parent: Option<&str>) -> Vec<&WbsNode> {
        self.nodes
            .values()
            .filter(|node| node.parent_key.as_deref() == parent)
            .collect()
    }

    /// Keys of `root` and all its descendants, breadth-first.
    ///
    /// Empty when `root` does not exist.
    pub fn subtree_keys(&self, root: &str) -> Vec<String> {
        if !self.nodes.contains_key(root) {
            return Vec::new();
        }

        let index = self.child_index();
        let mut selected = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(children) = index.get(key.as_str()) {
                queue.extend(children.iter().map(|child| child.to_string()));
            }
            selected.push(key);
        }
        selected
    }

    /// Recompute `is_group` for every node (or every node of one tree) in one
    /// pass over the collected parent references. Returns how many flags changed.
    pub fn recompute_groups(&mut self, tree: Option<&str>) -> usize {
        let parents: BTreeSet<String> = self
            .nodes
            .values()
            .filter_map(|node| node.parent_key.clone())
            .collect();

        let mut changed = 0;
        for node in self.nodes.values_mut() {
            if tree.is_some_and(|t| node.tree != t) {
                continue;
            }
            let is_group = parents.contains(&node.key);
            if node.is_group != is_group {
                node.is_group = is_group;
                node.touch_updated_at();
                changed += 1;
            }
        }
        changed
    }

    /// Allocate the next sequential key, e.g. `WBS-0042`.
    pub fn allocate_key(&mut self, prefix: &str) -> String {
        let serial = self.next_serial.max(1);
        self.next_serial = serial + 1;
        format!("{prefix}{serial:04}")
    }

    /// Remove the given keys. Returns the removed nodes.
    pub fn remove_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) -> Vec<WbsNode> {
        keys.into_iter()
            .filter_map(|key| self.nodes.remove(key))
            .collect()
    }

    /// Indented outline of a tree (or all trees).
    pub fn render_tree(&self, tree: Option<&str>) -> String {
        let index = self.child_index();
        let mut out = String::new();
        let mut stack: Vec<(&WbsNode, usize)> = self
            .nodes
            .values()
            .filter(|node| node.is_root() || !self.nodes.contains_key(node.parent_key.as_deref().unwrap_or_default()))
            .filter(|node| tree.is_none_or(|t| node.tree == t))
            .rev()
            .map(|node| (node, 0))
            .collect();

        while let Some((node, depth)) = stack.pop() {
            let mut tags = Vec::new();
            if node.is_group {
                tags.push("group");
            }
            if node.synthetic {
                tags.push("synthetic");
            }
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.structural_code);
            if !tags.is_empty() {
                out.push_str(&format!(" [{}]", tags.join(", ")));
            }
            out.push('\n');

            if let Some(children) = index.get(node.key.as_str()) {
                for child in children.iter().rev() {
                    if let Some(child) = self.nodes.get(*child) {
                        stack.push((child, depth + 1));
                    }
                }
            }
        }
        out
    }

    /// parent key → child keys, children sorted by structural code then key.
    fn child_index(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut index: BTreeMap<&str, Vec<&WbsNode>> = BTreeMap::new();
        for node in self.nodes.values() {
            if let Some(parent) = node.parent_key.as_deref() {
                index.entry(parent).or_default().push(node);
            }
        }
        index
            .into_iter()
            .map(|(parent, mut children)| {
                children.sort_by(|a, b| {
                    (a.structural_code.as_str(), a.key.as_str())
                        .cmp(&(b.structural_code.as_str(), b.key.as_str()))
                });
                (parent, children.into_iter().map(|c| c.key.as_str()).collect())
            })
            .collect()
    }
}

/// Numeric suffix of a key such as `WBS-0042`.
fn key_serial(key: &str) -> Option<u64> {
    let digits: String = key
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}
