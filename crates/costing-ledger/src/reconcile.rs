//! Full recomputation of derived ledger counters from document state.

use crate::documents::{DocumentError, DocumentSource, DocumentStatus, StockBalanceSource};
use crate::entry::LedgerEntry;
use crate::reservation::Effect;
use crate::store::LedgerStore;
use costing_tree::{CancelFlag, DEFAULT_PROGRESS_INTERVAL, NodeStore, ProgressSink, ProgressTracker};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Count draft documents as well as submitted ones.
    pub include_drafts: bool,
    pub progress_interval: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            include_drafts: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub node_key: String,
    pub changed: bool,
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationFailure {
    pub node_key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub total: usize,
    pub processed: usize,
    pub changed: usize,
    pub cancelled: bool,
    pub results: Vec<ReconciliationResult>,
    pub failures: Vec<ReconciliationFailure>,
    /// Node keys referenced by counted documents that have no ledger entry.
    pub orphans: Vec<String>,
    pub digest: String,
}

/// Counter totals rebuilt from documents for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    request_reserved_qty: Decimal,
    order_reserved_qty: Decimal,
    petty_cash_qty: Decimal,
    petty_cash_amount: Decimal,
    consumed_qty: Decimal,
}

impl Totals {
    /// Add one document's contribution. `None` when a counter overflows.
    fn add(&mut self, effect: Effect, qty: Decimal, amount: Decimal) -> Option<()> {
        match effect {
            Effect::RequestReservation => self.request_reserved_qty = self.request_reserved_qty.checked_add(qty)?,
            Effect::OrderReservation => self.order_reserved_qty = self.order_reserved_qty.checked_add(qty)?,
            Effect::PettyCash => {
                self.petty_cash_qty = self.petty_cash_qty.checked_add(qty)?;
                self.petty_cash_amount = self.petty_cash_amount.checked_add(amount)?;
            }
            Effect::Consumption => self.consumed_qty = self.consumed_qty.checked_add(qty)?,
        }
        Some(())
    }
}

/// Per-node totals plus the nodes whose sums could not be represented.
#[derive(Debug, Default)]
struct CollectedTotals {
    totals: BTreeMap<String, Totals>,
    overflowed: BTreeSet<String>,
}

pub struct ReconciliationEngine<'a> {
    ledger: &'a LedgerStore,
    documents: &'a dyn DocumentSource,
    stock: &'a dyn StockBalanceSource,
    options: ReconcileOptions,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(
        ledger: &'a LedgerStore,
        documents: &'a dyn DocumentSource,
        stock: &'a dyn StockBalanceSource,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            ledger,
            documents,
            stock,
            options,
        }
    }

    /// Recompute every leaf's reserved, petty-cash, consumed and warehouse
    /// counters and overwrite its entry. `available_qty` is left alone.
    ///
    /// Leaves come from both the ledger and `nodes`, so a leaf without an
    /// entry is reported as a failure rather than silently skipped. Entries
    /// whose counters already match are not committed again, so a second run
    /// with unchanged documents is a no-op. A node that fails is recorded and
    /// skipped.
    pub fn reconcile_all(
        &self,
        nodes: &NodeStore,
        cancel: &CancelFlag,
        progress: &dyn ProgressSink,
    ) -> Result<ReconcileReport, DocumentError> {
        let CollectedTotals { totals, overflowed } = self.collect_totals()?;

        let keys: Vec<String> = self
            .ledger
            .keys()
            .into_iter()
            .filter(|key| nodes.node(key).is_none_or(|node| !node.is_group))
            .chain(nodes.nodes().filter(|node| node.is_leaf()).map(|node| node.key.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let orphans: Vec<String> = totals
            .keys()
            .chain(overflowed.iter())
            .filter(|key| !self.ledger.contains(key))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut report = ReconcileReport {
            run_id: Uuid::new_v4(),
            total: keys.len(),
            processed: 0,
            changed: 0,
            cancelled: false,
            results: Vec::new(),
            failures: Vec::new(),
            orphans,
            digest: String::new(),
        };
        let mut tracker = ProgressTracker::new(progress, keys.len(), self.options.progress_interval);

        for key in &keys {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = if overflowed.contains(key) {
                Err("document totals overflow".to_string())
            } else {
                let node_totals = totals.get(key).copied().unwrap_or_default();
                self.reconcile_node(key, nodes, node_totals)
            };
            match outcome {
                Ok(result) => {
                    if result.changed {
                        report.changed += 1;
                    }
                    report.results.push(result);
                }
                Err(reason) => {
                    warn!(node_key = %key, %reason, "reconciliation failed for node");
                    report.failures.push(ReconciliationFailure {
                        node_key: key.clone(),
                        reason,
                    });
                }
            }
            report.processed += 1;
            tracker.advance();
        }

        report.digest = self.ledger.digest();
        info!(
            run_id = %report.run_id,
            total = report.total,
            changed = report.changed,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "reconciliation finished"
        );
        Ok(report)
    }

    fn collect_totals(&self) -> Result<CollectedTotals, DocumentError> {
        let mut collected = CollectedTotals::default();
        for document in self.documents.documents()? {
            let counted = match document.status {
                DocumentStatus::Submitted => true,
                DocumentStatus::Draft => self.options.include_drafts,
                DocumentStatus::Cancelled => false,
            };
            if !counted {
                continue;
            }
            let Some(effect) = Effect::of(&document) else {
                continue;
            };
            let by_node = match document.totals_by_node() {
                Ok(by_node) => by_node,
                Err(DocumentError::Overflow { id, node_key }) => {
                    // The whole document is uncountable; every node it touches fails.
                    warn!(document = %id, %node_key, "document line totals overflow");
                    for key in document.lines.iter().filter_map(|line| line.node_key.clone()) {
                        collected.totals.remove(&key);
                        collected.overflowed.insert(key);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            for (node_key, (qty, amount)) in by_node {
                if collected.overflowed.contains(&node_key) {
                    continue;
                }
                let slot = collected.totals.entry(node_key.clone()).or_default();
                if slot.add(effect, qty, amount).is_none() {
                    collected.totals.remove(&node_key);
                    collected.overflowed.insert(node_key);
                }
            }
        }
        Ok(collected)
    }

    fn reconcile_node(&self, key: &str, nodes: &NodeStore, totals: Totals) -> Result<ReconciliationResult, String> {
        let current = self
            .ledger
            .get(key)
            .ok_or_else(|| format!("ledger entry not found: {key}"))?;

        let item = nodes.node(key).and_then(|node| {
            node.item_reference
                .clone()
                .or_else(|| (!node.item_code.is_empty()).then(|| node.item_code.clone()))
        });
        let warehouse_qty = match item {
            Some(item) => self.stock.stock_balance(&item).map_err(|err| err.to_string())?,
            None => Decimal::ZERO,
        };

        let mut target = current.clone();
        target.request_reserved_qty = totals.request_reserved_qty;
        target.order_reserved_qty = totals.order_reserved_qty;
        target.petty_cash_qty = totals.petty_cash_qty;
        target.petty_cash_amount = totals.petty_cash_amount;
        target.consumed_qty = totals.consumed_qty;
        target.warehouse_qty = warehouse_qty;

        if target.same_quantities(&current) {
            return Ok(ReconciliationResult {
                node_key: key.to_string(),
                changed: false,
                entry: current,
            });
        }

        let entry = self
            .ledger
            .transact(key, |entry| {
                entry.request_reserved_qty = target.request_reserved_qty;
                entry.order_reserved_qty = target.order_reserved_qty;
                entry.petty_cash_qty = target.petty_cash_qty;
                entry.petty_cash_amount = target.petty_cash_amount;
                entry.consumed_qty = target.consumed_qty;
                entry.warehouse_qty = target.warehouse_qty;
                Ok(entry.clone())
            })
            .map_err(|err| err.to_string())?;
        Ok(ReconciliationResult {
            node_key: key.to_string(),
            changed: true,
            entry,
        })
    }
}
