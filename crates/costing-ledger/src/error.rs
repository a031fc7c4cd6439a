use costing_tree::JsonlError;
use rust_decimal::Decimal;

/// Errors raised by ledger mutations and persistence.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger entry not found: {0}")]
    EntryNotFound(String),

    #[error("insufficient available qty on {node_key}: requested {requested}, available {available}")]
    InsufficientAvailableQty {
        node_key: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid quantity {qty} for {node_key}: quantities must be non-negative")]
    InvalidQuantity { node_key: String, qty: Decimal },

    #[error("quantity overflow on {node_key}")]
    Overflow { node_key: String },

    #[error("commit failed for {node_key}: {message}")]
    CommitFailed { node_key: String, message: String },

    #[error(transparent)]
    Journal(#[from] JsonlError),
}

impl LedgerError {
    pub fn node_key(&self) -> Option<&str> {
        match self {
            Self::EntryNotFound(key) => Some(key),
            Self::InsufficientAvailableQty { node_key, .. }
            | Self::InvalidQuantity { node_key, .. }
            | Self::Overflow { node_key }
            | Self::CommitFailed { node_key, .. } => Some(node_key),
            Self::Journal(_) => None,
        }
    }
}
