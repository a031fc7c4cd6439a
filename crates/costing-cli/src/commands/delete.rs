use crate::config::CostingConfig;
use crate::jobs;
use crate::support::{exit_with, print_json_or_exit};
use costing_ledger::{DocumentCollection, LedgerStore, PurgeError, PurgeReport, delete_subtree};
use costing_tree::{NodeStore, mutate_nodes_jsonl};
use serde_json::json;

pub fn run(config: &CostingConfig, root: String, json_output: bool) {
    let progress_interval = config.progress_interval;
    let documents_path = config.documents_path.clone();
    let ledger_path = config.ledger_path.clone();
    let job_root = root.clone();

    let outcome = mutate_nodes_jsonl(
        &config.nodes_path,
        |store: &mut NodeStore| -> Result<(PurgeReport, bool), PurgeError> {
            let taken = std::mem::take(store);
            let documents = DocumentCollection::load_jsonl(&documents_path)?;
            let ledger = LedgerStore::open_journal(&ledger_path)?;

            let (result, nodes, documents) =
                jobs::run_bulk("delete", json_output, move |cancel, progress| {
                    let mut nodes = taken;
                    let mut documents = documents;
                    let result = delete_subtree(
                        &job_root,
                        &mut nodes,
                        &ledger,
                        &mut documents,
                        cancel,
                        progress,
                        progress_interval,
                    );
                    (result, nodes, documents)
                });
            *store = nodes;
            let report = result?;

            // Links go before the nodes file is rewritten.
            if report.links_cleared > 0 {
                documents.save_jsonl(&documents_path)?;
            }
            let changed = report.nodes_deleted > 0;
            Ok((report, changed))
        },
    );
    let report = outcome.unwrap_or_else(|e| exit_with(e));

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.delete",
            "root": root,
            "report": report,
            "affected": report.affected()
        }));
    } else {
        println!(
            "costing delete\n  Root: {root}\n  Nodes deleted: {}\n  Ledger entries deleted: {}\n  Documents touched: {} (links cleared {})\n  Ledger entries seeded: {}",
            report.nodes_deleted,
            report.entries_deleted,
            report.documents_touched,
            report.links_cleared,
            report.entries_seeded
        );
        if report.cancelled {
            println!("  Cancelled; run again to finish");
        }
    }
}
