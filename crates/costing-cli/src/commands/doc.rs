use crate::config::CostingConfig;
use crate::support::{acquire_lock_or_exit, exit_with, load_documents_or_exit, print_json_or_exit};
use costing_ledger::{
    Document, DocumentCollection, DocumentEffect, DocumentStatus, LedgerStore, ReservationEngine,
};
use serde_json::json;
use std::fs;

pub fn run_submit(config: &CostingConfig, file: String, json_output: bool) {
    let text = fs::read_to_string(&file)
        .unwrap_or_else(|e| exit_with(format!("failed to read {file}: {e}")));
    let mut document: Document = serde_json::from_str(&text)
        .unwrap_or_else(|e| exit_with(format!("failed to parse {file}: {e}")));
    // The file's own status is ignored; submission always starts from draft.
    document.status = DocumentStatus::Draft;

    let outcome = {
        let _lock = acquire_lock_or_exit(config);
        submit_locked(config, document)
    };
    let effect = outcome.unwrap_or_else(|e| exit_with(e));
    print_effect("costing.doc.submit", &effect, json_output);
}

pub fn run_cancel(config: &CostingConfig, id: String, json_output: bool) {
    let outcome = {
        let _lock = acquire_lock_or_exit(config);
        cancel_locked(config, &id)
    };
    let effect = outcome.unwrap_or_else(|e| exit_with(e));
    print_effect("costing.doc.cancel", &effect, json_output);
}

/// Ledger first, then the document file: a failed hook leaves no trace.
fn submit_locked(config: &CostingConfig, document: Document) -> Result<DocumentEffect, String> {
    let id = document.id.clone();
    let mut documents =
        DocumentCollection::load_jsonl(&config.documents_path).map_err(|e| e.to_string())?;
    if let Some(existing) = documents.get(&id)
        && existing.status != DocumentStatus::Draft
    {
        return Err(format!(
            "document {id}: cannot move from {} to submitted",
            existing.status.as_str()
        ));
    }

    let ledger = LedgerStore::open_journal(&config.ledger_path).map_err(|e| e.to_string())?;
    let effect = ReservationEngine::new(&ledger)
        .on_submit(&document)
        .map_err(|e| format!("document {id} rejected: {e}"))?;

    documents.upsert(document);
    documents
        .set_status(&id, DocumentStatus::Submitted)
        .map_err(|e| e.to_string())?;
    documents
        .save_jsonl(&config.documents_path)
        .map_err(|e| e.to_string())?;
    Ok(effect)
}

fn cancel_locked(config: &CostingConfig, id: &str) -> Result<DocumentEffect, String> {
    let mut documents =
        DocumentCollection::load_jsonl(&config.documents_path).map_err(|e| e.to_string())?;
    let document = documents
        .set_status(id, DocumentStatus::Cancelled)
        .map_err(|e| e.to_string())?
        .clone();

    let ledger = LedgerStore::open_journal(&config.ledger_path).map_err(|e| e.to_string())?;
    let effect = ReservationEngine::new(&ledger)
        .on_cancel(&document)
        .map_err(|e| format!("document {id} cancel failed: {e}"))?;
    documents
        .save_jsonl(&config.documents_path)
        .map_err(|e| e.to_string())?;
    Ok(effect)
}

pub fn run_status(config: &CostingConfig, node: String, json_output: bool) {
    let documents = load_documents_or_exit(&config.documents_path);
    let summary = documents.status_summary(&node);

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.doc.status",
            "node": node,
            "kinds": summary
        }));
        return;
    }

    println!("costing doc status\n  Node: {node}");
    for kind in summary {
        println!(
            "  - {}: draft {}x {} / submitted {}x {} / cancelled {}x {}",
            kind.kind.as_str(),
            kind.draft.count,
            kind.draft.qty,
            kind.submitted.count,
            kind.submitted.qty,
            kind.cancelled.count,
            kind.cancelled.qty
        );
    }
}

fn print_effect(action: &str, effect: &DocumentEffect, json_output: bool) {
    if json_output {
        print_json_or_exit(&json!({
            "action": action,
            "documentId": effect.document_id,
            "effect": effect.effect,
            "entries": effect.entries
        }));
        return;
    }

    let effect_name = match effect.effect {
        Some(effect) => format!("{effect:?}"),
        None => "none".to_string(),
    };
    println!(
        "costing {}\n  Document: {}\n  Effect: {effect_name}",
        action.trim_start_matches("costing.").replace('.', " "),
        effect.document_id
    );
    for entry in &effect.entries {
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
