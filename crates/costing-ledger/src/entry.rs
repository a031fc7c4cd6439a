use chrono::{DateTime, Utc};
use costing_tree::WbsNode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-leaf quantity record.
///
/// `available_qty` is the authoritative decrementing counter; the reserved and
/// consumed counters are sums maintained incrementally and rebuilt by
/// reconciliation. `warehouse_qty` mirrors an external stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub node_key: String,
    pub available_qty: Decimal,
    #[serde(default)]
    pub request_reserved_qty: Decimal,
    #[serde(default)]
    pub order_reserved_qty: Decimal,
    #[serde(default)]
    pub petty_cash_qty: Decimal,
    #[serde(default)]
    pub petty_cash_amount: Decimal,
    #[serde(default)]
    pub consumed_qty: Decimal,
    #[serde(default)]
    pub warehouse_qty: Decimal,
    #[serde(default)]
    pub resource_rate: Decimal,
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(node_key: impl Into<String>, available_qty: Decimal) -> Self {
        Self {
            node_key: node_key.into(),
            available_qty,
            request_reserved_qty: Decimal::ZERO,
            order_reserved_qty: Decimal::ZERO,
            petty_cash_qty: Decimal::ZERO,
            petty_cash_amount: Decimal::ZERO,
            consumed_qty: Decimal::ZERO,
            warehouse_qty: Decimal::ZERO,
            resource_rate: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Opening entry for a leaf: its full resource quantity is available.
    pub fn for_node(node: &WbsNode) -> Self {
        let mut entry = Self::new(node.key.clone(), node.budget.initial_available_qty());
        entry.resource_rate = node.budget.resource_rate.unwrap_or(Decimal::ZERO);
        entry
    }

    /// `availableQty × resourceRate`, or `None` when the product overflows.
    pub fn available_amount(&self) -> Option<Decimal> {
        self.available_qty.checked_mul(self.resource_rate)
    }

    /// Whether the quantity fields match, ignoring version and timestamps.
    pub fn same_quantities(&self, other: &LedgerEntry) -> bool {
        self.quantity_fields() == other.quantity_fields()
    }

    pub(crate) fn feed_digest(&self, hasher: &mut Sha256) {
        hasher.update(self.node_key.as_bytes());
        for (name, value) in self.quantity_fields() {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.normalize().to_string().as_bytes());
        }
        hasher.update(b"\n\n");
    }

    fn quantity_fields(&self) -> [(&'static str, Decimal); 8] {
        [
            ("available_qty", self.available_qty),
            ("request_reserved_qty", self.request_reserved_qty),
            ("order_reserved_qty", self.order_reserved_qty),
            ("petty_cash_qty", self.petty_cash_qty),
            ("petty_cash_amount", self.petty_cash_amount),
            ("consumed_qty", self.consumed_qty),
            ("warehouse_qty", self.warehouse_qty),
            ("resource_rate", self.resource_rate),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costing_tree::Budget;
    use rust_decimal_macros::dec;

    #[test]
    fn opening_entry_uses_total_resource_qty() {
        let mut node = WbsNode::new("WBS-0002", "boq-1", "A-01", 2, None);
        node.budget = Budget {
            budget_qty: Some(dec!(10)),
            resource_qty: Some(dec!(2)),
            waste_factor: Some(dec!(1.1)),
            resource_rate: Some(dec!(5)),
            ..Budget::default()
        };

        let entry = LedgerEntry::for_node(&node);
        assert_eq!(entry.available_qty, dec!(22.0));
        assert_eq!(entry.available_amount(), Some(dec!(110)));

        let mut huge = entry.clone();
        huge.available_qty = Decimal::MAX;
        assert_eq!(huge.available_amount(), None);
    }

    #[test]
    fn same_quantities_ignores_version() {
        let a = LedgerEntry::new("WBS-0001", dec!(5));
        let mut b = a.clone();
        b.version = 9;
        assert!(a.same_quantities(&b));
        b.consumed_qty = dec!(1);
        assert!(!a.same_quantities(&b));
    }
}
