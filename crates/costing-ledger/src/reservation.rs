//! Incremental quantity updates driven by document lifecycle events.

use crate::documents::{Document, DocumentError, DocumentKind, StockPurpose};
use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::store::LedgerStore;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Which counter an operation moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    RequestReservation,
    OrderReservation,
    PettyCash,
    Consumption,
}

impl Effect {
    /// Ledger effect of `document`, if it has one.
    pub fn of(document: &Document) -> Option<Effect> {
        match document.kind {
            DocumentKind::MaterialRequest => Some(Effect::RequestReservation),
            DocumentKind::PurchaseOrder => Some(Effect::OrderReservation),
            DocumentKind::GoodsReceipt if document.petty_cash => Some(Effect::PettyCash),
            DocumentKind::GoodsReceipt => None,
            DocumentKind::StockMovement => match document.purpose {
                Some(StockPurpose::MaterialIssue) => Some(Effect::Consumption),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Apply,
    Revert,
}

/// What one lifecycle event did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEffect {
    pub document_id: String,
    pub effect: Option<Effect>,
    pub entries: Vec<LedgerEntry>,
}

pub struct ReservationEngine<'a> {
    ledger: &'a LedgerStore,
}

impl<'a> ReservationEngine<'a> {
    pub fn new(ledger: &'a LedgerStore) -> Self {
        Self { ledger }
    }

    /// Claim `qty` from `available_qty` into `request_reserved_qty`.
    ///
    /// Rejected with `InsufficientAvailableQty` when `qty` exceeds what is
    /// available; the entry is left untouched.
    pub fn reserve_on_approval(&self, node_key: &str, qty: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.reserve(node_key, qty, Effect::RequestReservation)
    }

    /// Return `qty` from `request_reserved_qty` to `available_qty`. Never blocked.
    pub fn release_on_cancellation(&self, node_key: &str, qty: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.release(node_key, qty, Effect::RequestReservation)
    }

    pub fn reserve_order(&self, node_key: &str, qty: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.reserve(node_key, qty, Effect::OrderReservation)
    }

    pub fn release_order(&self, node_key: &str, qty: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.release(node_key, qty, Effect::OrderReservation)
    }

    /// Add a petty-cash receipt. Additive only; there is no public reversal.
    pub fn record_petty_cash(&self, node_key: &str, qty: Decimal, amount: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.petty_cash(node_key, qty, amount, Direction::Apply)
    }

    pub fn record_consumption(&self, node_key: &str, qty: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.consumption(node_key, qty, Direction::Apply)
    }

    pub fn reverse_consumption(&self, node_key: &str, qty: Decimal) -> Result<LedgerEntry, LedgerError> {
        self.consumption(node_key, qty, Direction::Revert)
    }

    /// Apply a submitted document's lines.
    ///
    /// Lines are summed per node and applied in key order. If any node fails,
    /// nodes already applied for this document are reverted before the error
    /// is returned.
    pub fn on_submit(&self, document: &Document) -> Result<DocumentEffect, LedgerError> {
        self.on_event(document, Direction::Apply)
    }

    /// Undo a cancelled document's lines. Petty-cash receipts are not reversible
    /// and leave the ledger unchanged.
    pub fn on_cancel(&self, document: &Document) -> Result<DocumentEffect, LedgerError> {
        if Effect::of(document) == Some(Effect::PettyCash) {
            info!(document = %document.id, "petty-cash receipts are not reversible; ledger unchanged");
            return Ok(DocumentEffect {
                document_id: document.id.clone(),
                effect: None,
                entries: Vec::new(),
            });
        }
        self.on_event(document, Direction::Revert)
    }

    fn on_event(&self, document: &Document, direction: Direction) -> Result<DocumentEffect, LedgerError> {
        let effect = Effect::of(document);
        let mut result = DocumentEffect {
            document_id: document.id.clone(),
            effect,
            entries: Vec::new(),
        };
        let Some(effect) = effect else {
            debug!(document = %document.id, kind = document.kind.as_str(), "document has no ledger effect");
            return Ok(result);
        };

        let totals = document.totals_by_node().map_err(|err| match err {
            DocumentError::Overflow { node_key, .. } => LedgerError::Overflow { node_key },
            other => LedgerError::CommitFailed {
                node_key: document.id.clone(),
                message: other.to_string(),
            },
        })?;
        let mut applied: Vec<(&str, Decimal, Decimal)> = Vec::new();
        for (node_key, (qty, amount)) in &totals {
            match self.apply(effect, direction, node_key, *qty, *amount) {
                Ok(entry) => {
                    applied.push((node_key.as_str(), *qty, *amount));
                    result.entries.push(entry);
                }
                Err(err) => {
                    warn!(document = %document.id, %node_key, error = %err, "document event failed; compensating");
                    self.compensate(effect, direction, &applied);
                    return Err(err);
                }
            }
        }

        info!(
            document = %document.id,
            effect = ?effect,
            nodes = result.entries.len(),
            "document event applied"
        );
        Ok(result)
    }

    fn compensate(&self, effect: Effect, direction: Direction, applied: &[(&str, Decimal, Decimal)]) {
        let inverse = match direction {
            Direction::Apply => Direction::Revert,
            Direction::Revert => Direction::Apply,
        };
        for (node_key, qty, amount) in applied.iter().rev() {
            if let Err(err) = self.apply(effect, inverse, node_key, *qty, *amount) {
                warn!(node_key, error = %err, "compensation failed; reconcile to repair");
            }
        }
    }

    fn apply(
        &self,
        effect: Effect,
        direction: Direction,
        node_key: &str,
        qty: Decimal,
        amount: Decimal,
    ) -> Result<LedgerEntry, LedgerError> {
        match (effect, direction) {
            (Effect::RequestReservation | Effect::OrderReservation, Direction::Apply) => {
                self.reserve(node_key, qty, effect)
            }
            (Effect::RequestReservation | Effect::OrderReservation, Direction::Revert) => {
                self.release(node_key, qty, effect)
            }
            (Effect::PettyCash, _) => self.petty_cash(node_key, qty, amount, direction),
            (Effect::Consumption, _) => self.consumption(node_key, qty, direction),
        }
    }

    fn reserve(&self, node_key: &str, qty: Decimal, effect: Effect) -> Result<LedgerEntry, LedgerError> {
        non_negative(node_key, qty)?;
        self.ledger.transact(node_key, |entry| {
            if qty > entry.available_qty {
                return Err(LedgerError::InsufficientAvailableQty {
                    node_key: node_key.to_string(),
                    requested: qty,
                    available: entry.available_qty,
                });
            }
            let counter = reserved_counter(entry, effect);
            *counter = checked_add(node_key, *counter, qty)?;
            entry.available_qty -= qty;
            Ok(entry.clone())
        })
    }

    fn release(&self, node_key: &str, qty: Decimal, effect: Effect) -> Result<LedgerEntry, LedgerError> {
        non_negative(node_key, qty)?;
        self.ledger.transact(node_key, |entry| {
            entry.available_qty = checked_add(node_key, entry.available_qty, qty)?;
            let counter = reserved_counter(entry, effect);
            *counter -= qty;
            if counter.is_sign_negative() && !counter.is_zero() {
                warn!(
                    node_key,
                    counter = ?effect,
                    shortfall = %(-*counter),
                    "NegativeReservationWarning: release exceeds reservation; clamping to zero"
                );
                *counter = Decimal::ZERO;
            }
            Ok(entry.clone())
        })
    }

    fn petty_cash(
        &self,
        node_key: &str,
        qty: Decimal,
        amount: Decimal,
        direction: Direction,
    ) -> Result<LedgerEntry, LedgerError> {
        non_negative(node_key, qty)?;
        non_negative(node_key, amount)?;
        self.ledger.transact(node_key, |entry| {
            match direction {
                Direction::Apply => {
                    entry.petty_cash_qty = checked_add(node_key, entry.petty_cash_qty, qty)?;
                    entry.petty_cash_amount = checked_add(node_key, entry.petty_cash_amount, amount)?;
                }
                Direction::Revert => {
                    entry.petty_cash_qty = (entry.petty_cash_qty - qty).max(Decimal::ZERO);
                    entry.petty_cash_amount = (entry.petty_cash_amount - amount).max(Decimal::ZERO);
                }
            }
            Ok(entry.clone())
        })
    }

    fn consumption(&self, node_key: &str, qty: Decimal, direction: Direction) -> Result<LedgerEntry, LedgerError> {
        non_negative(node_key, qty)?;
        self.ledger.transact(node_key, |entry| {
            match direction {
                Direction::Apply => entry.consumed_qty = checked_add(node_key, entry.consumed_qty, qty)?,
                Direction::Revert => {
                    if qty > entry.consumed_qty {
                        warn!(node_key, "reversal exceeds recorded consumption; clamping to zero");
                    }
                    entry.consumed_qty = (entry.consumed_qty - qty).max(Decimal::ZERO);
                }
            }
            Ok(entry.clone())
        })
    }
}

fn reserved_counter(entry: &mut LedgerEntry, effect: Effect) -> &mut Decimal {
    match effect {
        Effect::OrderReservation => &mut entry.order_reserved_qty,
        _ => &mut entry.request_reserved_qty,
    }
}

fn checked_add(node_key: &str, current: Decimal, qty: Decimal) -> Result<Decimal, LedgerError> {
    current.checked_add(qty).ok_or_else(|| LedgerError::Overflow {
        node_key: node_key.to_string(),
    })
}

fn non_negative(node_key: &str, qty: Decimal) -> Result<(), LedgerError> {
    if qty.is_sign_negative() && !qty.is_zero() {
        return Err(LedgerError::InvalidQuantity {
            node_key: node_key.to_string(),
            qty,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::LineItem;
    use rust_decimal_macros::dec;

    fn ledger_with(entries: &[(&str, Decimal)]) -> LedgerStore {
        let ledger = LedgerStore::in_memory();
        for (key, qty) in entries {
            ledger
                .ensure_entry(LedgerEntry::new(*key, *qty))
                .expect("seed");
        }
        ledger
    }

    #[test]
    fn over_release_is_clamped() {
        let ledger = ledger_with(&[("X", dec!(100))]);
        let engine = ReservationEngine::new(&ledger);
        engine.reserve_on_approval("X", dec!(10)).expect("reserve");

        let entry = engine.release_on_cancellation("X", dec!(15)).expect("release never blocks");
        assert_eq!(entry.request_reserved_qty, Decimal::ZERO);
        assert_eq!(entry.available_qty, dec!(105));
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let ledger = ledger_with(&[("X", dec!(100))]);
        let engine = ReservationEngine::new(&ledger);
        assert!(matches!(
            engine.reserve_on_approval("X", dec!(-1)),
            Err(LedgerError::InvalidQuantity { .. })
        ));
        assert_eq!(ledger.get("X").expect("entry").version, 1);
    }

    #[test]
    fn overflowing_counters_fail_without_committing() {
        let ledger = ledger_with(&[("X", Decimal::MAX)]);
        let engine = ReservationEngine::new(&ledger);
        engine.record_petty_cash("X", Decimal::MAX, dec!(1)).expect("first receipt");

        assert!(matches!(
            engine.record_petty_cash("X", dec!(1), dec!(1)),
            Err(LedgerError::Overflow { .. })
        ));
        assert!(matches!(
            engine.release_on_cancellation("X", dec!(1)),
            Err(LedgerError::Overflow { .. })
        ));
        let entry = ledger.get("X").expect("entry");
        assert_eq!(entry.petty_cash_qty, Decimal::MAX);
        assert_eq!(entry.available_qty, Decimal::MAX);
        assert_eq!(entry.version, 2);
    }

    #[test]
    fn order_reservation_is_tracked_separately() {
        let ledger = ledger_with(&[("X", dec!(50))]);
        let engine = ReservationEngine::new(&ledger);
        let entry = engine.reserve_order("X", dec!(20)).expect("order");
        assert_eq!(entry.order_reserved_qty, dec!(20));
        assert_eq!(entry.request_reserved_qty, Decimal::ZERO);
        assert_eq!(entry.available_qty, dec!(30));

        let entry = engine.release_order("X", dec!(20)).expect("release order");
        assert_eq!(entry.available_qty, dec!(50));
    }

    #[test]
    fn petty_cash_receipt_is_additive_and_not_reversed() {
        let ledger = ledger_with(&[("X", dec!(50))]);
        let engine = ReservationEngine::new(&ledger);
        let mut receipt = Document::new("GR-1", DocumentKind::GoodsReceipt).with_line(LineItem {
            node_key: Some("X".to_string()),
            qty: dec!(2),
            amount: dec!(30),
            item_code: None,
        });
        receipt.petty_cash = true;

        engine.on_submit(&receipt).expect("submit");
        engine.on_submit(&receipt).expect("submit again");
        let cancelled = engine.on_cancel(&receipt).expect("cancel");
        assert!(cancelled.entries.is_empty());

        let entry = ledger.get("X").expect("entry");
        assert_eq!(entry.petty_cash_qty, dec!(4));
        assert_eq!(entry.petty_cash_amount, dec!(60));
        assert_eq!(entry.available_qty, dec!(50));
    }

    #[test]
    fn plain_goods_receipt_has_no_effect() {
        let ledger = ledger_with(&[("X", dec!(50))]);
        let engine = ReservationEngine::new(&ledger);
        let receipt =
            Document::new("GR-2", DocumentKind::GoodsReceipt).with_line(LineItem::new("X", dec!(5)));
        let effect = engine.on_submit(&receipt).expect("submit");
        assert_eq!(effect.effect, None);
        assert_eq!(ledger.get("X").expect("entry").version, 1);
    }

    #[test]
    fn only_material_issue_counts_as_consumption() {
        let ledger = ledger_with(&[("X", dec!(50))]);
        let engine = ReservationEngine::new(&ledger);
        let mut issue =
            Document::new("SM-1", DocumentKind::StockMovement).with_line(LineItem::new("X", dec!(8)));
        issue.purpose = Some(StockPurpose::MaterialIssue);
        let mut transfer = issue.clone();
        transfer.id = "SM-2".to_string();
        transfer.purpose = Some(StockPurpose::MaterialTransfer);

        engine.on_submit(&issue).expect("issue");
        engine.on_submit(&transfer).expect("transfer");
        assert_eq!(ledger.get("X").expect("entry").consumed_qty, dec!(8));

        engine.on_cancel(&issue).expect("cancel issue");
        assert_eq!(ledger.get("X").expect("entry").consumed_qty, Decimal::ZERO);
    }

    #[test]
    fn failing_node_compensates_earlier_nodes() {
        let ledger = ledger_with(&[("A", dec!(10)), ("B", dec!(1))]);
        let engine = ReservationEngine::new(&ledger);
        let request = Document::new("MR-1", DocumentKind::MaterialRequest)
            .with_line(LineItem::new("A", dec!(4)))
            .with_line(LineItem::new("B", dec!(2)));

        let err = engine.on_submit(&request).expect_err("B is short");
        assert!(matches!(err, LedgerError::InsufficientAvailableQty { ref node_key, .. } if node_key == "B"));

        let a = ledger.get("A").expect("entry");
        assert_eq!(a.available_qty, dec!(10));
        assert_eq!(a.request_reserved_qty, Decimal::ZERO);
        assert_eq!(ledger.get("B").expect("entry").available_qty, dec!(1));
    }

    #[test]
    fn lines_for_same_node_are_checked_as_one_claim() {
        let ledger = ledger_with(&[("A", dec!(10))]);
        let engine = ReservationEngine::new(&ledger);
        let request = Document::new("MR-1", DocumentKind::MaterialRequest)
            .with_line(LineItem::new("A", dec!(6)))
            .with_line(LineItem::new("A", dec!(6)));

        assert!(engine.on_submit(&request).is_err());
        assert_eq!(ledger.get("A").expect("entry").available_qty, dec!(10));
    }
}
