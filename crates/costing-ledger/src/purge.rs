//! Bulk subtree deletion with reference stripping.

use crate::documents::{DocumentError, ReferenceStore};
use crate::error::LedgerError;
use crate::store::LedgerStore;
use costing_tree::{CancelFlag, NodeStore, ProgressSink, ProgressTracker};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Documents(#[from] DocumentError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub run_id: Uuid,
    pub root: String,
    pub nodes_deleted: usize,
    pub entries_deleted: usize,
    pub documents_touched: usize,
    pub links_cleared: usize,
    /// Opening entries created for parents left without children.
    pub entries_seeded: usize,
    pub cancelled: bool,
}

impl PurgeReport {
    /// Whether the run changed anything.
    pub fn affected(&self) -> usize {
        self.nodes_deleted + self.entries_deleted + self.links_cleared + self.entries_seeded
    }
}

/// Delete `root` and its descendants.
///
/// Links to every node in the subtree are stripped first, then ledger entries
/// and nodes go deepest-first so a cancelled run never strands a child without
/// its parent. A parent whose last child went becomes a leaf and gets an
/// opening ledger entry. Running again on a deleted subtree returns an empty
/// report.
pub fn delete_subtree(
    root: &str,
    nodes: &mut NodeStore,
    ledger: &LedgerStore,
    references: &mut dyn ReferenceStore,
    cancel: &CancelFlag,
    progress: &dyn ProgressSink,
    progress_interval: usize,
) -> Result<PurgeReport, PurgeError> {
    let mut report = PurgeReport {
        run_id: Uuid::new_v4(),
        root: root.to_string(),
        nodes_deleted: 0,
        entries_deleted: 0,
        documents_touched: 0,
        links_cleared: 0,
        entries_seeded: 0,
        cancelled: false,
    };

    let keys = nodes.subtree_keys(root);
    if keys.is_empty() {
        info!(root, "subtree already absent; nothing to delete");
        return Ok(report);
    }
    let tree = nodes.node(root).map(|node| node.tree.clone());

    let key_set: BTreeSet<String> = keys.iter().cloned().collect();
    let stripped = references.strip_references(&key_set)?;
    report.documents_touched = stripped.documents_touched;
    report.links_cleared = stripped.links_cleared;

    let mut tracker = ProgressTracker::new(progress, keys.len(), progress_interval);
    for key in keys.iter().rev() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if ledger.remove(key)? {
            report.entries_deleted += 1;
        }
        report.nodes_deleted += nodes.remove_all([key.as_str()]).len();
        tracker.advance();
    }

    nodes.recompute_groups(tree.as_deref());
    report.entries_seeded = ledger.seed_from_nodes(nodes)?;
    info!(
        run_id = %report.run_id,
        root,
        nodes_deleted = report.nodes_deleted,
        entries_deleted = report.entries_deleted,
        links_cleared = report.links_cleared,
        entries_seeded = report.entries_seeded,
        cancelled = report.cancelled,
        "subtree deleted"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{Document, DocumentCollection, DocumentKind, LineItem};
    use crate::entry::LedgerEntry;
    use costing_tree::{NoProgress, WbsNode};
    use rust_decimal_macros::dec;

    #[test]
    fn deleting_a_branch_regroups_the_parent() {
        let mut nodes = NodeStore::from_nodes(vec![
            WbsNode::new("WBS-0001", "boq-1", "A", 1, None),
            WbsNode::new("WBS-0002", "boq-1", "A-01", 2, Some("WBS-0001".to_string())),
        ]);
        nodes.recompute_groups(None);
        let ledger = LedgerStore::in_memory();
        ledger.ensure_entry(LedgerEntry::new("WBS-0002", dec!(1))).expect("seed");
        let mut documents = DocumentCollection::from_documents([
            Document::new("MR-1", DocumentKind::MaterialRequest).with_line(LineItem::new("WBS-0002", dec!(1))),
        ]);

        let report = delete_subtree(
            "WBS-0002",
            &mut nodes,
            &ledger,
            &mut documents,
            &CancelFlag::new(),
            &NoProgress,
            20,
        )
        .expect("delete");

        assert_eq!(report.nodes_deleted, 1);
        assert_eq!(report.entries_deleted, 1);
        assert_eq!(report.entries_seeded, 1);
        assert!(!nodes.node("WBS-0001").expect("parent stays").is_group);

        let engine = crate::reservation::ReservationEngine::new(&ledger);
        let entry = engine
            .reserve_on_approval("WBS-0001", dec!(0))
            .expect("new leaf has an entry");
        assert_eq!(entry.node_key, "WBS-0001");
        let reconciled = crate::reconcile::ReconciliationEngine::new(
            &ledger,
            &documents,
            &documents,
            crate::reconcile::ReconcileOptions::default(),
        )
        .reconcile_all(&nodes, &CancelFlag::new(), &NoProgress)
        .expect("reconcile");
        assert_eq!(reconciled.total, 1);
        assert!(reconciled.failures.is_empty());
    }

    #[test]
    fn cancelled_purge_removes_leaves_first() {
        let mut nodes = NodeStore::from_nodes(vec![
            WbsNode::new("WBS-0001", "boq-1", "A", 1, None),
            WbsNode::new("WBS-0002", "boq-1", "A-01", 2, Some("WBS-0001".to_string())),
            WbsNode::new("WBS-0003", "boq-1", "A-01-01", 3, Some("WBS-0002".to_string())),
        ]);
        let cancel = CancelFlag::new();
        let sink = |event: costing_tree::ProgressEvent| {
            if event.processed_count == 1 {
                cancel.cancel();
            }
        };

        let report = delete_subtree(
            "WBS-0001",
            &mut nodes,
            &LedgerStore::in_memory(),
            &mut DocumentCollection::default(),
            &cancel,
            &sink,
            1,
        )
        .expect("delete");

        assert!(report.cancelled);
        assert_eq!(report.nodes_deleted, 1);
        assert_eq!(report.entries_seeded, 1);
        assert!(nodes.node("WBS-0003").is_none());
        assert!(nodes.node("WBS-0002").is_some());
        assert!(!nodes.node("WBS-0002").expect("mid").is_group);
    }
}
