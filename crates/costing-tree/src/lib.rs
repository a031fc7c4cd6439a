//! # costing-tree
//!
//! Hierarchy layer for work-breakdown cost trees.
//!
//! This crate provides:
//! - `TreeCodec` (structural codes → level and candidate parent)
//! - column mapping and row reading for tabular imports
//! - `HierarchyBuilder` (rows → parent-linked nodes, synthesizing gaps)
//! - `NodeStore` (canonical in-memory node index, JSONL persistence)
//! - tree invariant checks
//! - progress and cancellation primitives shared by every bulk operation
//!
//! Budget ledgers and document reservations live in `costing-ledger`.
//!
//! ## Data model
//!
//! ```text
//! CSV/TSV rows ──► HierarchyBuilder ──► NodeStore ◄──► nodes.jsonl
//! ```

pub mod atomic_store;
pub mod builder;
pub mod check;
pub mod codec;
pub mod columns;
pub mod jsonl;
pub mod node;
pub mod progress;
pub mod store;

pub use atomic_store::{LockError, NodeMutationError, StoreLock, lock_path_for, mutate_nodes_jsonl};
pub use builder::{
    BuildMode, BuildOptions, BuildReport, HierarchyBuilder, ITEM_CODE_MAX_LEN, InsertedNode,
    ItemCatalog, NoCatalog, RowError, RowOrder,
};
pub use check::{
    FAILURE_CLASS_CROSS_TREE, FAILURE_CLASS_DANGLING_PARENT, FAILURE_CLASS_GROUP_FLAG,
    FAILURE_CLASS_LEVEL_RANGE, FAILURE_CLASS_PARENT_LEVEL, FAILURE_CLASS_SELF_PARENT,
    TREE_CHECK_KIND, TreeCheckReport, TreeFinding, TreeSummary, WARNING_CLASS_LEVEL_GAP,
    check_tree,
};
pub use codec::{
    CodePosition, CodecError, DEFAULT_MAX_LEVEL, TreeCodec, depth, is_segment_prefix,
    project_prefix, truncate_last_segment,
};
pub use columns::{
    ColumnBinding, ColumnField, ColumnMap, HeaderRule, ImportError, RawRow, normalize_header,
    read_rows, read_rows_from_path,
};
pub use jsonl::{
    JsonlError, append_record_to_path, read_records, read_records_from_path, write_records,
    write_records_to_path,
};
pub use node::{Budget, WbsNode};
pub use progress::{
    CancelFlag, DEFAULT_PROGRESS_INTERVAL, NoProgress, ProgressEvent, ProgressSink,
    ProgressTracker,
};
pub use store::{DEFAULT_KEY_PREFIX, NodeStore, NodeStoreError};
