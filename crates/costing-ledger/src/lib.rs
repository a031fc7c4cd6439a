//! # costing-ledger
//!
//! Quantity ledger for WBS leaves.
//!
//! This crate provides:
//! - `LedgerEntry` and `LedgerStore` (per-node transactions, JSONL commit journal)
//! - `ReservationEngine` (incremental updates from document lifecycle events)
//! - `ReconciliationEngine` (full recompute from document state)
//! - `delete_subtree` (reference stripping, then deepest-first deletion)
//!
//! Documents are an external collaborator reached through the traits in
//! [`documents`]; `DocumentCollection` is the file-backed implementation.
//!
//! ## Data model
//!
//! ```text
//! document events ──► ReservationEngine ──┐
//!                                         ▼
//!                      LedgerStore ◄──► ledger.jsonl (append-only)
//!                                         ▲
//! document state ───► ReconciliationEngine┘
//! ```

pub mod documents;
pub mod entry;
pub mod error;
pub mod purge;
pub mod reconcile;
pub mod reservation;
pub mod store;

pub use documents::{
    Document, DocumentCollection, DocumentError, DocumentKind, DocumentSource, DocumentStatus,
    KindSummary, LineItem, ReferenceStore, StatusTotals, StockBalanceSource, StockPurpose,
    StripReport,
};
pub use entry::LedgerEntry;
pub use error::LedgerError;
pub use purge::{PurgeError, PurgeReport, delete_subtree};
pub use reconcile::{
    ReconcileOptions, ReconcileReport, ReconciliationEngine, ReconciliationFailure,
    ReconciliationResult,
};
pub use reservation::{DocumentEffect, Effect, ReservationEngine};
pub use store::{CommitLog, CommitRecord, JournalLog, LedgerStore, NullLog};
