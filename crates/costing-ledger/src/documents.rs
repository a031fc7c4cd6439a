//! Dependent documents: the external collaborator the ledger reacts to.
//!
//! The ledger never owns document logic. It reads line items through
//! [`DocumentSource`], on-hand stock through [`StockBalanceSource`], and strips
//! links through [`ReferenceStore`]. [`DocumentCollection`] is the JSONL-backed
//! implementation of all three used by the CLI and tests.

use costing_tree::{JsonlError, read_records_from_path, write_records_to_path};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    MaterialRequest,
    PurchaseOrder,
    GoodsReceipt,
    StockMovement,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::MaterialRequest,
        DocumentKind::PurchaseOrder,
        DocumentKind::GoodsReceipt,
        DocumentKind::StockMovement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::MaterialRequest => "material_request",
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::GoodsReceipt => "goods_receipt",
            DocumentKind::StockMovement => "stock_movement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Submitted,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockPurpose {
    MaterialIssue,
    MaterialReceipt,
    MaterialTransfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key: Option<String>,
    pub qty: Decimal,
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_code: Option<String>,
}

impl LineItem {
    pub fn new(node_key: impl Into<String>, qty: Decimal) -> Self {
        Self {
            node_key: Some(node_key.into()),
            qty,
            amount: Decimal::ZERO,
            item_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub kind: DocumentKind,
    #[serde(default)]
    pub status: DocumentStatus,
    /// Goods receipts booked through the low-value petty-cash channel.
    #[serde(default)]
    pub petty_cash: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<StockPurpose>,
    /// Header-level link to a node, in addition to per-line links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key: Option<String>,
    #[serde(default)]
    pub lines: Vec<LineItem>,
}

impl Document {
    pub fn new(id: impl Into<String>, kind: DocumentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: DocumentStatus::Draft,
            petty_cash: false,
            purpose: None,
            node_key: None,
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: LineItem) -> Self {
        self.lines.push(line);
        self
    }

    /// Line quantities and amounts summed per node key, in key order.
    /// Lines without a node link are ignored.
    pub fn totals_by_node(&self) -> Result<BTreeMap<String, (Decimal, Decimal)>, DocumentError> {
        let mut totals: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
        for line in &self.lines {
            let Some(key) = &line.node_key else {
                continue;
            };
            let slot = totals.entry(key.clone()).or_default();
            let summed = slot
                .0
                .checked_add(line.qty)
                .zip(slot.1.checked_add(line.amount));
            *slot = summed.ok_or_else(|| DocumentError::Overflow {
                id: self.id.clone(),
                node_key: key.clone(),
            })?;
        }
        Ok(totals)
    }

    pub fn references(&self, node_key: &str) -> bool {
        self.node_key.as_deref() == Some(node_key)
            || self
                .lines
                .iter()
                .any(|line| line.node_key.as_deref() == Some(node_key))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("stock balance unavailable for {item}: {message}")]
    StockBalance { item: String, message: String },

    #[error("document {id}: line totals overflow on {node_key}")]
    Overflow { id: String, node_key: String },
}

/// Read access to every dependent document.
pub trait DocumentSource {
    fn documents(&self) -> Result<Vec<Document>, DocumentError>;
}

/// Live on-hand stock per item, owned by an external stock ledger.
pub trait StockBalanceSource {
    fn stock_balance(&self, item: &str) -> Result<Decimal, DocumentError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StripReport {
    pub documents_touched: usize,
    pub links_cleared: usize,
}

/// Write access used to null out links before nodes are deleted.
pub trait ReferenceStore {
    fn strip_references(&mut self, node_keys: &BTreeSet<String>) -> Result<StripReport, DocumentError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTotals {
    pub count: usize,
    pub qty: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub kind: DocumentKind,
    pub draft: StatusTotals,
    pub submitted: StatusTotals,
    pub cancelled: StatusTotals,
}

/// In-memory document set keyed by id, persisted as JSONL.
#[derive(Debug, Clone, Default)]
pub struct DocumentCollection {
    documents: BTreeMap<String, Document>,
}

impl DocumentCollection {
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        Self {
            documents: documents
                .into_iter()
                .map(|document| (document.id.clone(), document))
                .collect(),
        }
    }

    /// Missing file ⇒ empty collection.
    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let documents: Vec<Document> = read_records_from_path(path)?;
        Ok(Self::from_documents(documents))
    }

    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        let documents: Vec<&Document> = self.documents.values().collect();
        write_records_to_path(path, &documents)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn upsert(&mut self, document: Document) -> Option<Document> {
        self.documents.insert(document.id.clone(), document)
    }

    /// Move a stored document to `to`, enforcing draft → submitted → cancelled.
    pub fn set_status(&mut self, id: &str, to: DocumentStatus) -> Result<&Document, DocumentError> {
        let document = self
            .documents
            .get_mut(id)
            .ok_or_else(|| DocumentError::NotFound(id.to_string()))?;
        let allowed = matches!(
            (document.status, to),
            (DocumentStatus::Draft, DocumentStatus::Submitted)
                | (DocumentStatus::Submitted, DocumentStatus::Cancelled)
        );
        if !allowed {
            return Err(DocumentError::InvalidTransition {
                id: id.to_string(),
                from: document.status.as_str(),
                to: to.as_str(),
            });
        }
        document.status = to;
        Ok(document)
    }

    /// Per-kind draft/submitted/cancelled totals of lines linked to `node_key`.
    pub fn status_summary(&self, node_key: &str) -> Vec<KindSummary> {
        DocumentKind::ALL
            .iter()
            .map(|kind| {
                let mut summary = KindSummary {
                    kind: *kind,
                    draft: StatusTotals::default(),
                    submitted: StatusTotals::default(),
                    cancelled: StatusTotals::default(),
                };
                for document in self.documents.values().filter(|d| d.kind == *kind) {
                    let lines: Vec<&LineItem> = document
                        .lines
                        .iter()
                        .filter(|line| line.node_key.as_deref() == Some(node_key))
                        .collect();
                    if lines.is_empty() {
                        continue;
                    }
                    let totals = match document.status {
                        DocumentStatus::Draft => &mut summary.draft,
                        DocumentStatus::Submitted => &mut summary.submitted,
                        DocumentStatus::Cancelled => &mut summary.cancelled,
                    };
                    totals.count += 1;
                    for line in lines {
                        totals.qty = totals.qty.saturating_add(line.qty);
                        totals.amount = totals.amount.saturating_add(line.amount);
                    }
                }
                summary
            })
            .collect()
    }
}

impl DocumentSource for DocumentCollection {
    fn documents(&self) -> Result<Vec<Document>, DocumentError> {
        Ok(self.documents.values().cloned().collect())
    }
}

impl StockBalanceSource for DocumentCollection {
    /// Net of submitted stock movements for the item: receipts in, issues out.
    fn stock_balance(&self, item: &str) -> Result<Decimal, DocumentError> {
        let mut balance = Decimal::ZERO;
        for document in self.documents.values().filter(|document| {
            document.kind == DocumentKind::StockMovement && document.status == DocumentStatus::Submitted
        }) {
            let sign = match document.purpose {
                Some(StockPurpose::MaterialReceipt) => Decimal::ONE,
                Some(StockPurpose::MaterialIssue) => Decimal::NEGATIVE_ONE,
                Some(StockPurpose::MaterialTransfer) | None => continue,
            };
            for line in &document.lines {
                if line.item_code.as_deref() == Some(item) {
                    balance = balance
                        .checked_add(sign * line.qty)
                        .ok_or_else(|| DocumentError::StockBalance {
                            item: item.to_string(),
                            message: "balance overflow".to_string(),
                        })?;
                }
            }
        }
        Ok(balance)
    }
}

impl ReferenceStore for DocumentCollection {
    fn strip_references(&mut self, node_keys: &BTreeSet<String>) -> Result<StripReport, DocumentError> {
        let mut report = StripReport::default();
        for document in self.documents.values_mut() {
            let mut cleared = 0;
            if document
                .node_key
                .as_ref()
                .is_some_and(|key| node_keys.contains(key))
            {
                document.node_key = None;
                cleared += 1;
            }
            for line in &mut document.lines {
                if line.node_key.as_ref().is_some_and(|key| node_keys.contains(key)) {
                    line.node_key = None;
                    cleared += 1;
                }
            }
            if cleared > 0 {
                report.documents_touched += 1;
                report.links_cleared += cleared;
            }
        }
        Ok(report)
    }
}
