use crate::config::CostingConfig;
use crate::jobs;
use crate::support::{exit_with, print_json_or_exit};
use costing_ledger::{LedgerError, LedgerStore};
use costing_tree::{
    BuildReport, HierarchyBuilder, NodeStore, mutate_nodes_jsonl, read_rows_from_path,
};
use serde_json::json;

pub fn run(
    config: &CostingConfig,
    file: String,
    tree: String,
    by_level: bool,
    sort_by_level: bool,
    json_output: bool,
) {
    let rows = read_rows_from_path(&file, &config.column_map(by_level))
        .unwrap_or_else(|e| exit_with(format!("failed to read {file}: {e}")));
    let codec = config.codec();
    let options = config.build_options(&tree, by_level, sort_by_level);
    let ledger_path = config.ledger_path.clone();

    type Imported = (BuildReport, usize);
    let outcome = mutate_nodes_jsonl(
        &config.nodes_path,
        |store: &mut NodeStore| -> Result<(Imported, bool), LedgerError> {
            let taken = std::mem::take(store);
            let (report, built) = jobs::run_bulk("import", json_output, move |cancel, progress| {
                let mut nodes = taken;
                let report =
                    HierarchyBuilder::new(codec, options).build(&rows, &mut nodes, cancel, progress);
                (report, nodes)
            });
            *store = built;

            let ledger = LedgerStore::open_journal(&ledger_path)?;
            let seeded = ledger.seed_from_nodes(store)?;
            let changed = !report.inserted.is_empty()
                || !report.updated.is_empty()
                || report.groups_changed > 0;
            Ok(((report, seeded), changed))
        },
    );
    let (report, seeded) = outcome.unwrap_or_else(|e| exit_with(e));

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.import",
            "file": file,
            "nodesPath": config.nodes_path.display().to_string(),
            "ledgerEntriesSeeded": seeded,
            "report": report
        }));
    } else {
        print_text(&file, &report, seeded);
    }
}

fn print_text(file: &str, report: &BuildReport, seeded: usize) {
    println!(
        "costing import\n  File: {file}\n  Tree: {}\n  Rows: {} (placed {}, skipped {})\n  Inserted: {} (synthesized {})\n  Updated: {}\n  Ledger entries seeded: {seeded}",
        report.tree,
        report.total,
        report.success,
        report.errors.len(),
        report.inserted.len(),
        report.synthesized,
        report.updated.len(),
    );
    if report.cancelled {
        println!("  Cancelled after {} of {} rows", report.processed, report.total);
    }
    for error in &report.errors {
        match &error.code {
            Some(code) => println!("  - row {} ({code}): {}", error.row, error.reason),
            None => println!("  - row {}: {}", error.row, error.reason),
        }
    }
}
