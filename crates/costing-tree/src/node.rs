//! WBS node: one cost item in the breakdown hierarchy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Budget figures carried by a node.
///
/// All fields are optional because import sheets rarely fill every column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_qty: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_qty: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waste_factor: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_resource_qty: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_rate: Option<Decimal>,
}

impl Budget {
    /// `totalResourceQty`, derived as `budgetQty × wasteFactor × resourceQty`
    /// when not supplied directly. A product that overflows counts as absent.
    pub fn total_resource_qty(&self) -> Option<Decimal> {
        if self.total_resource_qty.is_some() {
            return self.total_resource_qty;
        }
        match (self.budget_qty, self.waste_factor, self.resource_qty) {
            (Some(qty), Some(waste), Some(resource)) => {
                qty.checked_mul(waste)?.checked_mul(resource)
            }
            _ => None,
        }
    }

    /// `budget = resourceRate × totalResourceQty`.
    pub fn amount(&self) -> Option<Decimal> {
        self.resource_rate?.checked_mul(self.total_resource_qty()?)
    }

    /// Quantity a fresh ledger entry starts with.
    pub fn initial_available_qty(&self) -> Decimal {
        self.total_resource_qty()
            .or(self.budget_qty)
            .unwrap_or(Decimal::ZERO)
    }

    /// Fill unset fields from `other`, letting `other` win where it is set.
    pub fn overlay(&mut self, other: &Budget) {
        let pairs = [
            (&mut self.budget_qty, other.budget_qty),
            (&mut self.resource_qty, other.resource_qty),
            (&mut self.waste_factor, other.waste_factor),
            (&mut self.total_resource_qty, other.total_resource_qty),
            (&mut self.resource_rate, other.resource_rate),
            (&mut self.material_rate, other.material_rate),
        ];
        for (slot, value) in pairs {
            if value.is_some() {
                *slot = value;
            }
        }
    }
}

/// A node in the work breakdown structure.
///
/// `parent_key` is a lookup reference only. `is_group` is never decided at
/// creation; it is recomputed once a build batch has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WbsNode {
    pub key: String,
    /// Tree (bill of quantities) this node belongs to.
    pub tree: String,
    pub structural_code: String,
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    /// Placeholder inserted to bridge a structural gap.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub item_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_reference: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uom: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub boq_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finance_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub combined_code: String,

    #[serde(default)]
    pub budget: Budget,

    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

impl WbsNode {
    pub fn new(
        key: impl Into<String>,
        tree: impl Into<String>,
        structural_code: impl Into<String>,
        level: u32,
        parent_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            tree: tree.into(),
            structural_code: structural_code.into(),
            level,
            parent_key,
            is_group: false,
            synthetic: false,
            description: String::new(),
            item_code: String::new(),
            item_reference: None,
            uom: String::new(),
            boq_id: String::new(),
            resource_type: String::new(),
            finance_code: String::new(),
            combined_code: String::new(),
            budget: Budget::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A zero-quantity placeholder labelled after the unresolved code prefix.
    pub fn synthetic(
        key: impl Into<String>,
        tree: impl Into<String>,
        structural_code: impl Into<String>,
        level: u32,
        parent_key: Option<String>,
    ) -> Self {
        let structural_code = structural_code.into();
        let mut node = Self::new(key, tree, structural_code.clone(), level, parent_key);
        node.synthetic = true;
        node.description = structural_code;
        node
    }

    pub fn is_root(&self) -> bool {
        self.parent_key.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_group
    }

    pub fn touch_updated_at(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Replace descriptive attributes with `incoming`'s, keeping identity and placement.
    ///
    /// Used when a code shows up again: the later row's attributes win.
    pub fn absorb_attributes(&mut self, incoming: &WbsNode) {
        fn take(slot: &mut String, value: &str) {
            if !value.is_empty() {
                *slot = value.to_string();
            }
        }

        take(&mut self.description, &incoming.description);
        take(&mut self.item_code, &incoming.item_code);
        take(&mut self.uom, &incoming.uom);
        take(&mut self.boq_id, &incoming.boq_id);
        take(&mut self.resource_type, &incoming.resource_type);
        take(&mut self.finance_code, &incoming.finance_code);
        take(&mut self.combined_code, &incoming.combined_code);
        if incoming.item_reference.is_some() {
            self.item_reference = incoming.item_reference.clone();
        }
        self.budget.overlay(&incoming.budget);
        self.synthetic = false;
        self.touch_updated_at();
    }
}
