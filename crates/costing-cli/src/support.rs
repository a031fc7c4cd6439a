use crate::config::CostingConfig;
use costing_ledger::{DocumentCollection, LedgerStore};
use costing_tree::{NodeStore, StoreLock};
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;

pub fn exit_with(message: impl Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

pub fn print_json_or_exit(payload: &impl Serialize) {
    match serde_json::to_string_pretty(payload) {
        Ok(text) => println!("{text}"),
        Err(e) => exit_with(format!("failed to render json: {e}")),
    }
}

pub fn load_config_or_exit(path: &str) -> CostingConfig {
    CostingConfig::load(path).unwrap_or_else(|e| exit_with(e))
}

/// Workspace-wide writer lock, held next to the nodes file.
pub fn acquire_lock_or_exit(config: &CostingConfig) -> StoreLock {
    StoreLock::acquire(&config.nodes_path).unwrap_or_else(|e| exit_with(e))
}

pub fn load_nodes_or_exit(path: &Path) -> NodeStore {
    NodeStore::load_jsonl(path)
        .unwrap_or_else(|e| exit_with(format!("failed to load {}: {e}", path.display())))
}

pub fn open_ledger_or_exit(path: &Path) -> LedgerStore {
    LedgerStore::open_journal(path)
        .unwrap_or_else(|e| exit_with(format!("failed to open ledger {}: {e}", path.display())))
}

pub fn load_documents_or_exit(path: &Path) -> DocumentCollection {
    DocumentCollection::load_jsonl(path)
        .unwrap_or_else(|e| exit_with(format!("failed to load {}: {e}", path.display())))
}
