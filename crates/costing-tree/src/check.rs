//! Deterministic tree invariant checking.

use crate::store::NodeStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const TREE_CHECK_KIND: &str = "costing.tree.check.v1";

pub const FAILURE_CLASS_DANGLING_PARENT: &str = "tree.parent.dangling";
pub const FAILURE_CLASS_SELF_PARENT: &str = "tree.parent.self";
pub const FAILURE_CLASS_PARENT_LEVEL: &str = "tree.parent.level_not_lower";
pub const FAILURE_CLASS_GROUP_FLAG: &str = "tree.group_flag.mismatch";
pub const FAILURE_CLASS_LEVEL_RANGE: &str = "tree.level.out_of_range";
pub const FAILURE_CLASS_CROSS_TREE: &str = "tree.parent.cross_tree";
pub const WARNING_CLASS_LEVEL_GAP: &str = "tree.level.gap";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TreeFinding {
    pub node_key: String,
    pub class: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TreeSummary {
    pub node_count: usize,
    pub root_count: usize,
    pub group_count: usize,
    pub synthetic_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub max_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TreeCheckReport {
    pub check_kind: String,
    pub result: String,
    pub failure_classes: Vec<String>,
    pub warning_classes: Vec<String>,
    pub errors: Vec<TreeFinding>,
    pub warnings: Vec<TreeFinding>,
    pub summary: TreeSummary,
}

impl TreeCheckReport {
    pub fn accepted(&self) -> bool {
        self.result == "accepted"
    }
}

fn collect_classes(findings: &[TreeFinding]) -> Vec<String> {
    findings
        .iter()
        .map(|finding| finding.class.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn finding(node_key: &str, class: &str, message: String) -> TreeFinding {
    TreeFinding {
        node_key: node_key.to_string(),
        class: class.to_string(),
        message,
    }
}

pub fn check_tree(store: &NodeStore, max_level: u32) -> TreeCheckReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let parents: BTreeSet<&str> = store
        .nodes()
        .filter_map(|node| node.parent_key.as_deref())
        .collect();

    for node in store.nodes() {
        let key = node.key.as_str();

        if node.level < 1 || node.level > max_level {
            errors.push(finding(
                key,
                FAILURE_CLASS_LEVEL_RANGE,
                format!("level={} outside 1..={max_level}", node.level),
            ));
        }

        let has_children = parents.contains(key);
        if node.is_group != has_children {
            errors.push(finding(
                key,
                FAILURE_CLASS_GROUP_FLAG,
                format!("is_group={} but has_children={has_children}", node.is_group),
            ));
        }

        let Some(parent_key) = node.parent_key.as_deref() else {
            continue;
        };
        if parent_key == key {
            errors.push(finding(key, FAILURE_CLASS_SELF_PARENT, "node is its own parent".to_string()));
            continue;
        }
        let Some(parent) = store.node(parent_key) else {
            errors.push(finding(
                key,
                FAILURE_CLASS_DANGLING_PARENT,
                format!("parent {parent_key} does not exist"),
            ));
            continue;
        };
        if parent.tree != node.tree {
            errors.push(finding(
                key,
                FAILURE_CLASS_CROSS_TREE,
                format!("parent {parent_key} belongs to tree {}", parent.tree),
            ));
        }
        if parent.level >= node.level {
            errors.push(finding(
                key,
                FAILURE_CLASS_PARENT_LEVEL,
                format!("parent level={} is not below level={}", parent.level, node.level),
            ));
        } else if node.level - parent.level > 1 {
            warnings.push(finding(
                key,
                WARNING_CLASS_LEVEL_GAP,
                format!("parent level={} skips to level={}", parent.level, node.level),
            ));
        }
    }

    let failure_classes = collect_classes(&errors);
    let warning_classes = collect_classes(&warnings);
    let result = if errors.is_empty() {
        "accepted".to_string()
    } else {
        "rejected".to_string()
    };
    let summary = TreeSummary {
        node_count: store.len(),
        root_count: store.nodes().filter(|node| node.is_root()).count(),
        group_count: store.nodes().filter(|node| node.is_group).count(),
        synthetic_count: store.nodes().filter(|node| node.synthetic).count(),
        error_count: errors.len(),
        warning_count: warnings.len(),
        max_level,
    };

    TreeCheckReport {
        check_kind: TREE_CHECK_KIND.to_string(),
        result,
        failure_classes,
        warning_classes,
        errors,
        warnings,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::WbsNode;

    fn node(key: &str, code: &str, level: u32, parent: Option<&str>) -> WbsNode {
        WbsNode::new(key, "boq-1", code, level, parent.map(str::to_string))
    }

    #[test]
    fn consistent_tree_is_accepted() {
        let mut store = NodeStore::from_nodes(vec![
            node("WBS-0001", "A", 1, None),
            node("WBS-0002", "A-01", 2, Some("WBS-0001")),
        ]);
        store.recompute_groups(None);

        let report = check_tree(&store, 4);
        assert!(report.accepted(), "{report:?}");
        assert_eq!(report.summary.root_count, 1);
        assert_eq!(report.summary.group_count, 1);
    }

    #[test]
    fn broken_links_are_classified() {
        let store = NodeStore::from_nodes(vec![
            node("WBS-0001", "A", 2, None),
            node("WBS-0002", "A-01", 2, Some("WBS-0001")),
            node("WBS-0003", "B-01", 2, Some("WBS-0099")),
            node("WBS-0004", "C", 6, Some("WBS-0004")),
        ]);

        let report = check_tree(&store, 4);
        assert!(!report.accepted());
        assert_eq!(
            report.failure_classes,
            vec![
                FAILURE_CLASS_DANGLING_PARENT.to_string(),
                FAILURE_CLASS_SELF_PARENT.to_string(),
                FAILURE_CLASS_PARENT_LEVEL.to_string(),
                FAILURE_CLASS_GROUP_FLAG.to_string(),
                FAILURE_CLASS_LEVEL_RANGE.to_string(),
            ]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
        );
    }

    #[test]
    fn level_gap_is_a_warning() {
        let mut store = NodeStore::from_nodes(vec![
            node("WBS-0001", "A", 1, None),
            node("WBS-0002", "A-01", 3, Some("WBS-0001")),
        ]);
        store.recompute_groups(None);

        let report = check_tree(&store, 4);
        assert!(report.accepted());
        assert_eq!(report.warning_classes, vec![WARNING_CLASS_LEVEL_GAP.to_string()]);
    }
}
