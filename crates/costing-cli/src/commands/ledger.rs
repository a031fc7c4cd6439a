use crate::config::CostingConfig;
use crate::support::{
    acquire_lock_or_exit, exit_with, load_documents_or_exit, open_ledger_or_exit,
    print_json_or_exit,
};
use costing_ledger::{LedgerEntry, LedgerError, LedgerStore, ReservationEngine};
use rust_decimal::Decimal;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Reserve,
    Release,
    OrderReserve,
    OrderRelease,
    PettyCash,
}

impl LedgerOp {
    fn action(self) -> &'static str {
        match self {
            LedgerOp::Reserve => "costing.reserve",
            LedgerOp::Release => "costing.release",
            LedgerOp::OrderReserve => "costing.order_reserve",
            LedgerOp::OrderRelease => "costing.order_release",
            LedgerOp::PettyCash => "costing.petty_cash",
        }
    }

    fn apply(
        self,
        engine: &ReservationEngine<'_>,
        node: &str,
        qty: Decimal,
        amount: Decimal,
    ) -> Result<LedgerEntry, LedgerError> {
        match self {
            LedgerOp::Reserve => engine.reserve_on_approval(node, qty),
            LedgerOp::Release => engine.release_on_cancellation(node, qty),
            LedgerOp::OrderReserve => engine.reserve_order(node, qty),
            LedgerOp::OrderRelease => engine.release_order(node, qty),
            LedgerOp::PettyCash => engine.record_petty_cash(node, qty, amount),
        }
    }
}

pub fn run_op(
    config: &CostingConfig,
    op: LedgerOp,
    node: String,
    qty: Decimal,
    amount: Option<Decimal>,
    json_output: bool,
) {
    let outcome = {
        let _lock = acquire_lock_or_exit(config);
        LedgerStore::open_journal(&config.ledger_path).and_then(|ledger| {
            op.apply(
                &ReservationEngine::new(&ledger),
                &node,
                qty,
                amount.unwrap_or_default(),
            )
        })
    };
    let entry = outcome.unwrap_or_else(|e| exit_with(e));

    if json_output {
        print_json_or_exit(&json!({
            "action": op.action(),
            "node": node,
            "qty": qty,
            "entry": entry,
            "availableAmount": entry.available_amount()
        }));
    } else {
        println!("costing {}\n  Node: {node}\n  Qty: {qty}", op.action().trim_start_matches("costing."));
        print_entry(&entry);
    }
}

pub fn run_show(config: &CostingConfig, node: Option<String>, json_output: bool) {
    let ledger = open_ledger_or_exit(&config.ledger_path);

    let Some(node) = node else {
        let entries = ledger.entries();
        if json_output {
            print_json_or_exit(&json!({
                "action": "costing.ledger",
                "ledgerPath": config.ledger_path.display().to_string(),
                "count": entries.len(),
                "digest": ledger.digest(),
                "entries": entries
            }));
        } else {
            println!(
                "costing ledger\n  Path: {}\n  Entries: {}\n  Digest: {}",
                config.ledger_path.display(),
                entries.len(),
                ledger.digest()
            );
            for entry in &entries {
                println!(
                    "  - {} available={} requested={} ordered={} consumed={}",
                    entry.node_key,
                    entry.available_qty,
                    entry.request_reserved_qty,
                    entry.order_reserved_qty,
                    entry.consumed_qty
                );
            }
        }
        return;
    };

    let entry = ledger
        .get(&node)
        .unwrap_or_else(|| exit_with(LedgerError::EntryNotFound(node.clone())));
    let documents = load_documents_or_exit(&config.documents_path);
    let summary = documents.status_summary(&node);

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.ledger",
            "node": node,
            "entry": entry,
            "availableAmount": entry.available_amount(),
            "documents": summary
        }));
    } else {
        println!("costing ledger\n  Node: {node}");
        print_entry(&entry);
        for kind in summary {
            println!(
                "  {}: draft {} / submitted {} / cancelled {}",
                kind.kind.as_str(),
                kind.draft.qty,
                kind.submitted.qty,
                kind.cancelled.qty
            );
        }
    }
}

pub fn run_compact(config: &CostingConfig, json_output: bool) {
    let outcome = {
        let _lock = acquire_lock_or_exit(config);
        LedgerStore::open_journal(&config.ledger_path)
            .and_then(|ledger| Ok((ledger.compact()?, ledger.digest())))
    };
    let (written, digest) = outcome.unwrap_or_else(|e| exit_with(e));

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.compact",
            "ledgerPath": config.ledger_path.display().to_string(),
            "entries": written,
            "digest": digest
        }));
    } else {
        println!(
            "costing compact\n  Path: {}\n  Entries: {written}",
            config.ledger_path.display()
        );
    }
}

fn print_entry(entry: &LedgerEntry) {
    println!(
        "  Available: {} (amount {})\n  Request reserved: {}\n  Order reserved: {}\n  Petty cash: {} (amount {})\n  Consumed: {}\n  Warehouse: {}\n  Version: {}",
        entry.available_qty,
        entry
            .available_amount()
            .map_or_else(|| "overflow".to_string(), |amount| amount.to_string()),
        entry.request_reserved_qty,
        entry.order_reserved_qty,
        entry.petty_cash_qty,
        entry.petty_cash_amount,
        entry.consumed_qty,
        entry.warehouse_qty,
        entry.version
    );
}
