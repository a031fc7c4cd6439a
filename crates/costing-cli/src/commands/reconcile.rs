use crate::config::CostingConfig;
use crate::jobs;
use crate::support::{acquire_lock_or_exit, exit_with, print_json_or_exit};
use costing_ledger::{
    DocumentCollection, LedgerStore, ReconcileOptions, ReconcileReport, ReconciliationEngine,
};
use costing_tree::NodeStore;
use serde_json::json;

pub fn run(config: &CostingConfig, include_drafts: bool, json_output: bool) {
    let options = config.reconcile_options(include_drafts);
    let outcome = {
        let _lock = acquire_lock_or_exit(config);
        reconcile_locked(config, options, json_output)
    };
    let report = outcome.unwrap_or_else(|e| exit_with(e));

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.reconcile",
            "includeDrafts": include_drafts,
            "report": report
        }));
    } else {
        println!(
            "costing reconcile\n  Entries: {} (processed {}, changed {}, failed {})\n  Digest: {}",
            report.total,
            report.processed,
            report.changed,
            report.failures.len(),
            report.digest
        );
        if report.cancelled {
            println!("  Cancelled after {} of {} entries", report.processed, report.total);
        }
        for failure in &report.failures {
            println!("  - FAIL {} ({})", failure.node_key, failure.reason);
        }
        for orphan in &report.orphans {
            println!("  - WARN {orphan} referenced by documents but has no ledger entry");
        }
    }
}

fn reconcile_locked(
    config: &CostingConfig,
    options: ReconcileOptions,
    json_output: bool,
) -> Result<ReconcileReport, String> {
    let nodes = NodeStore::load_jsonl(&config.nodes_path).map_err(|e| e.to_string())?;
    let documents =
        DocumentCollection::load_jsonl(&config.documents_path).map_err(|e| e.to_string())?;
    let ledger = LedgerStore::open_journal(&config.ledger_path).map_err(|e| e.to_string())?;

    jobs::run_bulk("reconcile", json_output, move |cancel, progress| {
        ReconciliationEngine::new(&ledger, &documents, &documents, options)
            .reconcile_all(&nodes, cancel, progress)
            .map_err(|e| e.to_string())
    })
}
