//! Hierarchy construction from flat tabular rows.
//!
//! Rows are placed one at a time against a [`NodeStore`]. Parents must exist
//! before a child references them: when a structural parent is missing, the
//! builder synthesizes placeholder ancestors (top-most first) before inserting
//! the child. Group flags are recomputed once, after the whole batch.

use crate::codec::{CodePosition, TreeCodec, depth, is_segment_prefix, truncate_last_segment};
use crate::columns::{ColumnField, RawRow};
use crate::node::{Budget, WbsNode};
use crate::progress::{CancelFlag, DEFAULT_PROGRESS_INTERVAL, ProgressSink, ProgressTracker};
use crate::store::{DEFAULT_KEY_PREFIX, NodeStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum stored length of an item code.
pub const ITEM_CODE_MAX_LEN: usize = 140;

/// How parents are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Parents come from structural codes (`A-01` is the parent of `A-01-02`).
    #[default]
    Structural,
    /// Parents come from row order and explicit levels alone: a row's parent is
    /// the latest row with the greatest level strictly below its own.
    LevelOnly,
}

/// Order in which rows are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowOrder {
    /// Rows are already parent-before-child.
    #[default]
    Input,
    /// Stable sort by level first.
    LevelAscending,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub tree: String,
    pub key_prefix: String,
    pub mode: BuildMode,
    pub row_order: RowOrder,
    pub progress_interval: usize,
}

impl BuildOptions {
    pub fn new(tree: impl Into<String>) -> Self {
        Self {
            tree: tree.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            mode: BuildMode::default(),
            row_order: RowOrder::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Catalog lookup for item references, by exact item name.
pub trait ItemCatalog {
    fn resolve_item(&self, name: &str) -> Option<String>;
}

impl ItemCatalog for BTreeMap<String, String> {
    fn resolve_item(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Catalog that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCatalog;

impl ItemCatalog for NoCatalog {
    fn resolve_item(&self, _name: &str) -> Option<String> {
        None
    }
}

static NO_CATALOG: NoCatalog = NoCatalog;

/// A skipped row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertedNode {
    pub key: String,
    pub structural_code: String,
    pub level: u32,
    pub synthetic: bool,
}

/// Aggregate result of one build.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub run_id: Uuid,
    pub tree: String,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub errors: Vec<RowError>,
    pub inserted: Vec<InsertedNode>,
    /// Keys whose attributes were overwritten by a repeated code.
    pub updated: Vec<String>,
    pub synthesized: usize,
    pub groups_changed: usize,
    pub cancelled: bool,
    /// Snapshot of every created or updated node after group recomputation.
    pub nodes: Vec<WbsNode>,
}

impl BuildReport {
    fn new(tree: &str, total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tree: tree.to_string(),
            total,
            processed: 0,
            success: 0,
            errors: Vec::new(),
            inserted: Vec::new(),
            updated: Vec::new(),
            synthesized: 0,
            groups_changed: 0,
            cancelled: false,
            nodes: Vec::new(),
        }
    }

    fn reject(&mut self, row: &RawRow, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(row = row.row_number, code = ?row.code(), %reason, "skipping import row");
        self.errors.push(RowError {
            row: row.row_number,
            code: row.code().map(str::to_string),
            reason,
        });
    }
}

/// Outcome of looking for one parent.
enum Resolution {
    Found(String),
    Synthesize(String),
    Root,
}

/// Code indices used while a batch is being placed.
struct BatchIndex {
    /// Codes placed by this batch.
    batch: HashMap<String, String>,
    /// Codes that existed in the tree before the batch started.
    persisted: HashMap<String, String>,
    /// level → codes known at that level, for prefix scans.
    by_level: BTreeMap<u32, Vec<(String, String)>>,
}

impl BatchIndex {
    fn new(store: &NodeStore, tree: &str) -> Self {
        let mut persisted = HashMap::new();
        let mut by_level: BTreeMap<u32, Vec<(String, String)>> = BTreeMap::new();
        for node in store.tree_nodes(tree) {
            persisted.insert(node.structural_code.clone(), node.key.clone());
            by_level
                .entry(node.level)
                .or_default()
                .push((node.structural_code.clone(), node.key.clone()));
        }
        Self {
            batch: HashMap::new(),
            persisted,
            by_level,
        }
    }

    fn key_for_code(&self, code: &str) -> Option<&String> {
        self.batch.get(code).or_else(|| self.persisted.get(code))
    }


    /// Resolve the parent of `code` (at `level`), trying in order: exact
    /// candidate match in this batch, exact match among persisted nodes, then
    /// the longest known code at `level - 1` that prefixes `code`.
    fn resolve(&self, store: &NodeStore, code: &str, candidate: Option<&str>, level: u32) -> Resolution {
        let below = |key: &&String| store.node(key).is_some_and(|node| node.level < level);

        if let Some(candidate) = candidate {
            if let Some(key) = self.batch.get(candidate).filter(|key| below(key)) {
                return Resolution::Found(key.clone());
            }
            if let Some(key) = self.persisted.get(candidate).filter(|key| below(key)) {
                return Resolution::Found(key.clone());
            }
        }

        let scanned = self
            .by_level
            .get(&(level - 1))
            .into_iter()
            .flatten()
            .filter(|(known, _)| is_segment_prefix(known, code))
            .max_by_key(|(known, _)| known.len());
        if let Some((_, key)) = scanned {
            return Resolution::Found(key.clone());
        }

        match candidate {
            Some(candidate) if self.key_for_code(candidate).is_none() => {
                Resolution::Synthesize(candidate.to_string())
            }
            _ => Resolution::Root,
        }
    }
}

/// Code to key lookup shared by both build modes.
trait CodeIndex {
    fn lookup(&self, code: &str) -> Option<&String>;
    fn record(&mut self, code: &str, key: &str, level: u32);
}

impl CodeIndex for BatchIndex {
    fn lookup(&self, code: &str) -> Option<&String> {
        self.key_for_code(code)
    }

    fn record(&mut self, code: &str, key: &str, level: u32) {
        self.batch.insert(code.to_string(), key.to_string());
        self.by_level
            .entry(level)
            .or_default()
            .push((code.to_string(), key.to_string()));
    }
}

impl CodeIndex for HashMap<String, String> {
    fn lookup(&self, code: &str) -> Option<&String> {
        self.get(code)
    }

    fn record(&mut self, code: &str, key: &str, _level: u32) {
        self.insert(code.to_string(), key.to_string());
    }
}

/// Code of the placeholder bridging `anchor_code` down to `level`.
fn bridge_code(anchor_code: &str, level: u32) -> String {
    format!("{anchor_code}~L{level}")
}

pub struct HierarchyBuilder<'a> {
    codec: TreeCodec,
    options: BuildOptions,
    catalog: &'a dyn ItemCatalog,
}

impl HierarchyBuilder<'static> {
    pub fn new(codec: TreeCodec, options: BuildOptions) -> Self {
        Self {
            codec,
            options,
            catalog: &NO_CATALOG,
        }
    }
}

impl<'a> HierarchyBuilder<'a> {
    pub fn with_catalog<'b>(self, catalog: &'b dyn ItemCatalog) -> HierarchyBuilder<'b> {
        HierarchyBuilder {
            codec: self.codec,
            options: self.options,
            catalog,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Place `rows` into `store`.
    ///
    /// Per-row failures are collected in the report and never abort the batch.
    /// On cancellation the rows already placed stay in the store and group
    /// flags are still recomputed.
    pub fn build(
        &self,
        rows: &[RawRow],
        store: &mut NodeStore,
        cancel: &CancelFlag,
        progress: &dyn ProgressSink,
    ) -> BuildReport {
        let tree = self.options.tree.as_str();
        let mut report = BuildReport::new(tree, rows.len());
        let mut tracker = ProgressTracker::new(progress, rows.len(), self.options.progress_interval);
        let ordered = self.ordered(rows);
        let mut touched: Vec<String> = Vec::new();

        match self.options.mode {
            BuildMode::Structural => {
                let mut index = BatchIndex::new(store, tree);
                for row in ordered {
                    if cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    match self.place_structural(row, store, &mut index, cancel, &mut report) {
                        Placement::Placed(key) => touched.push(key),
                        Placement::Skipped => {}
                        Placement::Cancelled => {
                            report.cancelled = true;
                            break;
                        }
                    }
                    report.processed += 1;
                    tracker.advance();
                }
            }
            BuildMode::LevelOnly => {
                let mut codes: HashMap<String, String> = store
                    .tree_nodes(tree)
                    .map(|node| (node.structural_code.clone(), node.key.clone()))
                    .collect();
                let mut stack: Vec<(u32, String)> = Vec::new();
                for row in ordered {
                    if cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    if let Some(key) = self.place_by_level(row, store, &mut codes, &mut stack, &mut report) {
                        touched.push(key);
                    }
                    report.processed += 1;
                    tracker.advance();
                }
            }
        }

        report.groups_changed = store.recompute_groups(Some(tree));

        let mut seen = HashSet::new();
        report.nodes = touched
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .filter_map(|key| store.node(&key).cloned())
            .collect();

        info!(
            run_id = %report.run_id,
            tree,
            total = report.total,
            success = report.success,
            failed = report.errors.len(),
            synthesized = report.synthesized,
            cancelled = report.cancelled,
            "hierarchy build finished"
        );
        report
    }

    fn ordered<'r>(&self, rows: &'r [RawRow]) -> Vec<&'r RawRow> {
        let mut ordered: Vec<&RawRow> = rows.iter().collect();
        if self.options.row_order == RowOrder::LevelAscending {
            ordered.sort_by_key(|row| {
                row.level()
                    .and_then(Result::ok)
                    .unwrap_or_else(|| row.code().map(depth).unwrap_or(0))
            });
        }
        ordered
    }

    fn position(&self, row: &RawRow, report: &mut BuildReport) -> Option<CodePosition> {
        let explicit_level = match row.level() {
            None => None,
            Some(Ok(level)) => Some(level),
            Some(Err(raw)) => {
                report.reject(row, format!("invalid level: {raw}"));
                return None;
            }
        };
        let Some(code) = row.code() else {
            report.reject(row, "missing structural code");
            return None;
        };
        match self.codec.parse(code, explicit_level) {
            Ok(position) => Some(position),
            Err(err) => {
                report.reject(row, err.to_string());
                None
            }
        }
    }

    fn place_structural(
        &self,
        row: &RawRow,
        store: &mut NodeStore,
        index: &mut BatchIndex,
        cancel: &CancelFlag,
        report: &mut BuildReport,
    ) -> Placement {
        let Some(position) = self.position(row, report) else {
            return Placement::Skipped;
        };

        let attributes = self.node_from_row(row, &position, String::new(), None);
        if let Some(key) = index.key_for_code(&position.code).cloned() {
            return self.absorb_duplicate(key, &attributes, store, report);
        }

        // Walk up with an explicit stack: each unresolved candidate becomes a
        // pending synthetic ancestor one level above the previous one.
        let mut pending: Vec<(String, u32)> = Vec::new();
        let mut cursor_code = position.code.clone();
        let mut cursor_level = position.level;
        let mut candidate = position.parent_code.clone();
        let anchor = loop {
            if cursor_level <= 1 {
                break None;
            }
            if cancel.is_cancelled() {
                return Placement::Cancelled;
            }
            match index.resolve(store, &cursor_code, candidate.as_deref(), cursor_level) {
                Resolution::Found(key) => break Some(key),
                Resolution::Root => break None,
                Resolution::Synthesize(code) => {
                    cursor_level -= 1;
                    candidate = truncate_last_segment(&code).map(str::to_string);
                    pending.push((code.clone(), cursor_level));
                    cursor_code = code;
                }
            }
        };

        // An explicit or clamped level can sit several levels below the
        // anchor; every missing level in between gets a placeholder.
        let mut parent = self.bridge_levels(anchor, cursor_level, store, index, report, &position.code);
        for (code, level) in pending.into_iter().rev() {
            let key = self.insert_synthetic(store, index, report, code, level, parent.take(), &position.code);
            parent = Some(key);
        }

        let key = store.allocate_key(&self.options.key_prefix);
        let mut node = attributes;
        node.key = key.clone();
        node.parent_key = parent;
        store.upsert(node);
        index.record(&position.code, &key, position.level);
        report.inserted.push(InsertedNode {
            key: key.clone(),
            structural_code: position.code,
            level: position.level,
            synthetic: false,
        });
        report.success += 1;
        Placement::Placed(key)
    }

    fn place_by_level(
        &self,
        row: &RawRow,
        store: &mut NodeStore,
        codes: &mut HashMap<String, String>,
        stack: &mut Vec<(u32, String)>,
        report: &mut BuildReport,
    ) -> Option<String> {
        if row.level().is_none() {
            report.reject(row, "missing level");
            return None;
        }
        let position = self.position(row, report)?;

        while stack.last().is_some_and(|(level, _)| *level >= position.level) {
            stack.pop();
        }

        if let Some(key) = codes.get(&position.code).cloned() {
            let attributes = self.node_from_row(row, &position, String::new(), None);
            let level = store.node(&key).map_or(position.level, |node| node.level);
            if let Placement::Placed(key) = self.absorb_duplicate(key, &attributes, store, report) {
                stack.push((level, key.clone()));
                return Some(key);
            }
            return None;
        }

        let parent = stack.last().map(|(_, key)| key.clone());
        let parent = self.bridge_levels(parent, position.level, store, codes, report, &position.code);
        let key = store.allocate_key(&self.options.key_prefix);
        let node = self.node_from_row(row, &position, key.clone(), parent);
        store.upsert(node);
        codes.record(&position.code, &key, position.level);
        stack.push((position.level, key.clone()));
        report.inserted.push(InsertedNode {
            key: key.clone(),
            structural_code: position.code,
            level: position.level,
            synthetic: false,
        });
        report.success += 1;
        Some(key)
    }

    /// Fill every level strictly between `parent` and `level` with a
    /// synthetic node, reusing placeholders an earlier row already created.
    /// Returns the key the node at `level` attaches to.
    fn bridge_levels(
        &self,
        parent: Option<String>,
        level: u32,
        store: &mut NodeStore,
        codes: &mut impl CodeIndex,
        report: &mut BuildReport,
        child_code: &str,
    ) -> Option<String> {
        let mut parent_key = parent?;
        let Some(anchor) = store.node(&parent_key) else {
            return Some(parent_key);
        };
        let (anchor_code, anchor_level) = (anchor.structural_code.clone(), anchor.level);

        for gap_level in anchor_level.saturating_add(1)..level {
            let code = bridge_code(&anchor_code, gap_level);
            let reusable = codes
                .lookup(&code)
                .filter(|key| {
                    store
                        .node(key)
                        .is_some_and(|node| node.level == gap_level && node.parent_key.as_deref() == Some(parent_key.as_str()))
                })
                .cloned();
            parent_key = match reusable {
                Some(key) => key,
                None => self.insert_synthetic(store, codes, report, code, gap_level, Some(parent_key), child_code),
            };
        }
        Some(parent_key)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_synthetic(
        &self,
        store: &mut NodeStore,
        codes: &mut impl CodeIndex,
        report: &mut BuildReport,
        code: String,
        level: u32,
        parent: Option<String>,
        child_code: &str,
    ) -> String {
        let key = store.allocate_key(&self.options.key_prefix);
        debug!(%key, %code, level, child = %child_code, "synthesizing missing parent");
        store.upsert(WbsNode::synthetic(
            key.clone(),
            self.options.tree.clone(),
            code.clone(),
            level,
            parent,
        ));
        codes.record(&code, &key, level);
        report.synthesized += 1;
        report.inserted.push(InsertedNode {
            key: key.clone(),
            structural_code: code,
            level,
            synthetic: true,
        });
        key
    }

    fn absorb_duplicate(
        &self,
        key: String,
        attributes: &WbsNode,
        store: &mut NodeStore,
        report: &mut BuildReport,
    ) -> Placement {
        match store.node_mut(&key) {
            Some(existing) => {
                debug!(%key, code = %attributes.structural_code, "repeated code; later attributes win");
                existing.absorb_attributes(attributes);
                report.updated.push(key.clone());
                report.success += 1;
                Placement::Placed(key)
            }
            None => Placement::Skipped,
        }
    }

    fn node_from_row(
        &self,
        row: &RawRow,
        position: &CodePosition,
        key: String,
        parent_key: Option<String>,
    ) -> WbsNode {
        let mut node = WbsNode::new(
            key,
            self.options.tree.clone(),
            position.code.clone(),
            position.level,
            parent_key,
        );

        let text = |field| row.text(field).unwrap_or_default().to_string();
        node.description = text(ColumnField::Description);
        node.uom = text(ColumnField::Uom);
        node.boq_id = text(ColumnField::BoqId);
        node.resource_type = text(ColumnField::ResourceType);
        node.finance_code = text(ColumnField::FinanceCode);
        node.combined_code = text(ColumnField::CombinedCode);
        node.item_code = text(ColumnField::Item)
            .chars()
            .take(ITEM_CODE_MAX_LEN)
            .collect();
        if !node.item_code.is_empty() {
            node.item_reference = self.catalog.resolve_item(&node.item_code);
        }

        node.budget = Budget {
            budget_qty: row.decimal(ColumnField::BudgetQty),
            resource_qty: row.decimal(ColumnField::ResourceQty),
            waste_factor: row.decimal(ColumnField::WasteFactor),
            total_resource_qty: row.decimal(ColumnField::TotalResourceQty),
            resource_rate: row.decimal(ColumnField::ResourceRate),
            material_rate: row.decimal(ColumnField::MaterialRate),
        };
        node
    }
}

enum Placement {
    Placed(String),
    Skipped,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use rust_decimal_macros::dec;

    fn row(n: usize, code: &str) -> RawRow {
        RawRow::new(n).with(ColumnField::StructuralCode, code)
    }

    fn build(rows: &[RawRow], store: &mut NodeStore) -> BuildReport {
        HierarchyBuilder::new(TreeCodec::default(), BuildOptions::new("boq-1")).build(
            rows,
            store,
            &CancelFlag::new(),
            &NoProgress,
        )
    }

    fn by_code<'s>(store: &'s NodeStore, code: &str) -> &'s WbsNode {
        store
            .find_by_code("boq-1", code)
            .unwrap_or_else(|| panic!("node {code} should exist"))
    }

    #[test]
    fn missing_intermediate_parent_is_synthesized() {
        let mut store = NodeStore::default();
        let report = build(
            &[row(2, "A-01"), row(3, "A-01-01"), row(4, "A-02-01")],
            &mut store,
        );

        assert!(report.errors.is_empty());
        let a02 = by_code(&store, "A-02");
        assert!(a02.synthetic);
        assert!(a02.is_group);
        assert_eq!(by_code(&store, "A-02-01").parent_key.as_deref(), Some(a02.key.as_str()));
        assert!(by_code(&store, "A-01").is_group);
        assert!(!by_code(&store, "A-01-01").is_group);
    }

    #[test]
    fn level_gap_is_bridged_at_every_level() {
        let mut store = NodeStore::default();
        let report = build(&[row(2, "A"), row(3, "A-1-2-3")], &mut store);

        assert_eq!(report.synthesized, 2);
        let chain = ["A", "A-1", "A-1-2", "A-1-2-3"];
        for pair in chain.windows(2) {
            let parent = by_code(&store, pair[0]);
            let child = by_code(&store, pair[1]);
            assert_eq!(child.parent_key.as_deref(), Some(parent.key.as_str()));
            assert_eq!(child.level, parent.level + 1);
        }
    }

    #[test]
    fn synthetic_ancestors_precede_the_child() {
        let mut store = NodeStore::default();
        let report = build(&[row(2, "X-1-2")], &mut store);
        let codes: Vec<&str> = report
            .inserted
            .iter()
            .map(|node| node.structural_code.as_str())
            .collect();
        assert_eq!(codes, vec!["X", "X-1", "X-1-2"]);
        assert!(report.inserted[0].synthetic && report.inserted[1].synthetic);
        assert!(!report.inserted[2].synthetic);
    }

    #[test]
    fn duplicate_code_keeps_first_key_and_takes_last_attributes() {
        let mut store = NodeStore::default();
        let first = row(2, "A").with(ColumnField::Description, "first");
        let second = row(3, "A")
            .with(ColumnField::Description, "second")
            .with(ColumnField::BudgetQty, "7");
        let report = build(&[first, second], &mut store);

        assert_eq!(store.len(), 1);
        let node = by_code(&store, "A");
        assert_eq!(node.key, "WBS-0001");
        assert_eq!(node.description, "second");
        assert_eq!(node.budget.budget_qty, Some(dec!(7)));
        assert_eq!(report.updated, vec!["WBS-0001".to_string()]);
        assert_eq!(report.nodes.len(), 1);
    }

    #[test]
    fn bad_rows_are_reported_not_fatal() {
        let mut store = NodeStore::default();
        let rows = [
            RawRow::new(2).with(ColumnField::Description, "no code"),
            row(3, "A").with(ColumnField::Level, "x"),
            row(4, "B"),
        ];
        let report = build(&rows, &mut store);

        assert_eq!(report.success, 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(report.errors[0].reason, "missing structural code");
        assert_eq!(report.errors[1].code.as_deref(), Some("A"));
    }

    #[test]
    fn prefix_scan_finds_parent_when_truncation_misses() {
        let mut store = NodeStore::default();
        let rows = [
            row(2, "P24").with(ColumnField::Level, "1"),
            row(3, "P24-01.A").with(ColumnField::Level, "2"),
            row(4, "P24-01.A-7").with(ColumnField::Level, "3"),
            row(5, "P24-01.A.B-9").with(ColumnField::Level, "3"),
        ];
        let report = build(&rows, &mut store);

        assert_eq!(report.synthesized, 0, "{report:?}");
        let parent = by_code(&store, "P24-01.A");
        assert_eq!(
            by_code(&store, "P24-01.A.B-9").parent_key.as_deref(),
            Some(parent.key.as_str())
        );
    }

    #[test]
    fn incremental_import_reuses_persisted_parents() {
        let mut store = NodeStore::default();
        build(&[row(2, "A"), row(3, "A-01")], &mut store);
        let report = build(&[row(2, "A-01-05")], &mut store);

        assert_eq!(report.synthesized, 0);
        assert_eq!(
            by_code(&store, "A-01-05").parent_key.as_deref(),
            Some(by_code(&store, "A-01").key.as_str())
        );
        assert_eq!(store.allocate_key("WBS-"), "WBS-0004");
    }

    #[test]
    fn levels_above_max_are_clamped() {
        let mut store = NodeStore::default();
        build(
            &[row(2, "A").with(ColumnField::Level, "1"), row(3, "A-9").with(ColumnField::Level, "7")],
            &mut store,
        );
        let clamped = by_code(&store, "A-9");
        assert_eq!(clamped.level, 4);
        let parent = store
            .node(clamped.parent_key.as_deref().unwrap_or_default())
            .expect("clamped node should have a parent");
        assert_eq!(parent.level, 3);
        assert!(parent.synthetic);
    }

    #[test]
    fn explicit_level_gap_is_bridged() {
        let mut store = NodeStore::default();
        let report = build(
            &[
                row(2, "A").with(ColumnField::Level, "1"),
                row(3, "A-01").with(ColumnField::Level, "4"),
                row(4, "A-02").with(ColumnField::Level, "4"),
            ],
            &mut store,
        );

        assert!(report.errors.is_empty(), "{report:?}");
        assert_eq!(report.synthesized, 2);
        let l2 = by_code(&store, "A~L2");
        let l3 = by_code(&store, "A~L3");
        assert_eq!(l2.parent_key.as_deref(), Some(by_code(&store, "A").key.as_str()));
        assert_eq!(l3.parent_key.as_deref(), Some(l2.key.as_str()));
        for code in ["A-01", "A-02"] {
            assert_eq!(by_code(&store, code).parent_key.as_deref(), Some(l3.key.as_str()));
        }
        for node in store.nodes().filter(|node| !node.is_root()) {
            let parent = store.node(node.parent_key.as_deref().unwrap_or_default()).expect("parent");
            assert_eq!(parent.level + 1, node.level, "{}", node.structural_code);
        }
        assert!(crate::check::check_tree(&store, 4).warnings.is_empty());
    }

    #[test]
    fn cancelled_build_keeps_placed_rows() {
        let mut store = NodeStore::default();
        let cancel = CancelFlag::new();
        let rows = [row(2, "A"), row(3, "A-01"), row(4, "A-02")];
        let sink = |event: crate::progress::ProgressEvent| {
            if event.processed_count == 2 {
                cancel.cancel();
            }
        };
        let mut options = BuildOptions::new("boq-1");
        options.progress_interval = 1;
        let report = HierarchyBuilder::new(TreeCodec::default(), options).build(
            &rows,
            &mut store,
            &cancel,
            &sink,
        );

        assert!(report.cancelled);
        assert_eq!(report.processed, 2);
        assert_eq!(store.len(), 2);
        assert!(by_code(&store, "A").is_group);
    }

    #[test]
    fn level_only_mode_uses_last_shallower_row() {
        let mut store = NodeStore::default();
        let mut options = BuildOptions::new("boq-1");
        options.mode = BuildMode::LevelOnly;
        let rows = [
            row(2, "DIV-1").with(ColumnField::Level, "1"),
            row(3, "ITEM-1").with(ColumnField::Level, "2"),
            row(4, "ITEM-2").with(ColumnField::Level, "3"),
            row(5, "ITEM-3").with(ColumnField::Level, "2"),
            row(6, "DIV-2").with(ColumnField::Level, "1"),
            row(7, "NOLEVEL"),
        ];
        let report = HierarchyBuilder::new(TreeCodec::default(), options).build(
            &rows,
            &mut store,
            &CancelFlag::new(),
            &NoProgress,
        );

        assert_eq!(report.errors.len(), 1);
        let div1 = by_code(&store, "DIV-1").key.clone();
        let item1 = by_code(&store, "ITEM-1").key.clone();
        assert_eq!(by_code(&store, "ITEM-1").parent_key.as_deref(), Some(div1.as_str()));
        assert_eq!(by_code(&store, "ITEM-2").parent_key.as_deref(), Some(item1.as_str()));
        assert_eq!(by_code(&store, "ITEM-3").parent_key.as_deref(), Some(div1.as_str()));
        assert!(by_code(&store, "DIV-2").is_root());
    }

    #[test]
    fn level_only_mode_bridges_skipped_levels() {
        let mut store = NodeStore::default();
        let mut options = BuildOptions::new("boq-1");
        options.mode = BuildMode::LevelOnly;
        let rows = [
            row(2, "DIV-1").with(ColumnField::Level, "1"),
            row(3, "ITEM-1").with(ColumnField::Level, "3"),
        ];
        let report = HierarchyBuilder::new(TreeCodec::default(), options).build(
            &rows,
            &mut store,
            &CancelFlag::new(),
            &NoProgress,
        );

        assert_eq!(report.synthesized, 1);
        let bridge = by_code(&store, "DIV-1~L2");
        assert!(bridge.synthetic && bridge.is_group);
        assert_eq!(by_code(&store, "ITEM-1").parent_key.as_deref(), Some(bridge.key.as_str()));
    }

    #[test]
    fn catalog_resolves_item_reference_by_name() {
        let mut catalog = BTreeMap::new();
        catalog.insert("Cement 50kg".to_string(), "ITM-0007".to_string());
        let mut store = NodeStore::default();
        HierarchyBuilder::new(TreeCodec::default(), BuildOptions::new("boq-1"))
            .with_catalog(&catalog)
            .build(
                &[
                    row(2, "A").with(ColumnField::Item, "Cement 50kg"),
                    row(3, "B").with(ColumnField::Item, "Unknown"),
                ],
                &mut store,
                &CancelFlag::new(),
                &NoProgress,
            );

        assert_eq!(by_code(&store, "A").item_reference.as_deref(), Some("ITM-0007"));
        assert_eq!(by_code(&store, "B").item_reference, None);
        assert_eq!(by_code(&store, "B").item_code, "Unknown");
    }
}
