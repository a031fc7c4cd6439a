//! Tabular import: header mapping and raw row extraction.
//!
//! Spreadsheet layouts vary from project to project, so columns are found by
//! fuzzy header match. The matching is a declarative table of rules evaluated
//! in order; each rule claims the first unclaimed header it matches.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Business field a column can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnField {
    Level,
    StructuralCode,
    BoqId,
    ResourceType,
    TotalResourceQty,
    ResourceQty,
    BudgetQty,
    WasteFactor,
    MaterialRate,
    ResourceRate,
    FinanceCode,
    Description,
    CombinedCode,
    Item,
    Uom,
}

impl ColumnField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnField::Level => "level",
            ColumnField::StructuralCode => "structural_code",
            ColumnField::BoqId => "boq_id",
            ColumnField::ResourceType => "resource_type",
            ColumnField::TotalResourceQty => "total_resource_qty",
            ColumnField::ResourceQty => "resource_qty",
            ColumnField::BudgetQty => "budget_qty",
            ColumnField::WasteFactor => "waste_factor",
            ColumnField::MaterialRate => "material_rate",
            ColumnField::ResourceRate => "resource_rate",
            ColumnField::FinanceCode => "finance_code",
            ColumnField::Description => "description",
            ColumnField::CombinedCode => "combined_code",
            ColumnField::Item => "item",
            ColumnField::Uom => "uom",
        }
    }
}

/// One header-matching rule. Needles are lowercase.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRule {
    pub field: ColumnField,
    /// Header equals one of these.
    pub exact: &'static [&'static str],
    /// Header contains one of these.
    pub any_of: &'static [&'static str],
    /// Header contains all of these.
    pub all_of: &'static [&'static str],
    /// Header contains none of these.
    pub none_of: &'static [&'static str],
}

impl HeaderRule {
    const fn new(field: ColumnField) -> Self {
        Self {
            field,
            exact: &[],
            any_of: &[],
            all_of: &[],
            none_of: &[],
        }
    }

    const fn exact(mut self, needles: &'static [&'static str]) -> Self {
        self.exact = needles;
        self
    }

    const fn any_of(mut self, needles: &'static [&'static str]) -> Self {
        self.any_of = needles;
        self
    }

    const fn all_of(mut self, needles: &'static [&'static str]) -> Self {
        self.all_of = needles;
        self
    }

    const fn none_of(mut self, needles: &'static [&'static str]) -> Self {
        self.none_of = needles;
        self
    }

    pub fn matches(&self, normalized_header: &str) -> bool {
        if self.exact.iter().any(|needle| *needle == normalized_header) {
            return true;
        }
        if self.any_of.is_empty() && self.all_of.is_empty() {
            return false;
        }
        let any = self.any_of.is_empty()
            || self.any_of.iter().any(|n| normalized_header.contains(n));
        let all = self.all_of.iter().all(|n| normalized_header.contains(n));
        let none = !self.none_of.iter().any(|n| normalized_header.contains(n));
        any && all && none
    }
}

/// Rules in evaluation order. Order matters: `WBS Level` must land on the
/// level column before the code rule sees the `wbs` substring, and
/// `Total Resource QTY` before the plain resource quantity.
pub const DEFAULT_RULES: &[HeaderRule] = &[
    HeaderRule::new(ColumnField::Level).any_of(&["level", "lvl"]),
    HeaderRule::new(ColumnField::StructuralCode).any_of(&["cost code", "wbs"]),
    HeaderRule::new(ColumnField::BoqId).any_of(&["boq id"]),
    HeaderRule::new(ColumnField::ResourceType).all_of(&["res", "type"]),
    HeaderRule::new(ColumnField::TotalResourceQty).all_of(&["total", "resource", "qty"]),
    HeaderRule::new(ColumnField::ResourceQty)
        .all_of(&["resource", "qty"])
        .none_of(&["total"]),
    HeaderRule::new(ColumnField::BudgetQty).any_of(&["boq qty", "budget qty"]),
    HeaderRule::new(ColumnField::WasteFactor).any_of(&["waste"]),
    HeaderRule::new(ColumnField::MaterialRate).any_of(&["material rate", "unit cost"]),
    HeaderRule::new(ColumnField::ResourceRate).any_of(&["budget rate", "resource rate", "unit rate"]),
    HeaderRule::new(ColumnField::FinanceCode).any_of(&["finance code", "cost center"]),
    HeaderRule::new(ColumnField::Description).any_of(&["description"]),
    HeaderRule::new(ColumnField::CombinedCode).any_of(&["combined code"]),
    HeaderRule::new(ColumnField::Item).exact(&["item", "item code", "item name"]),
    HeaderRule::new(ColumnField::Uom).exact(&["unit", "uom", "unit of measure"]),
];

/// Errors raised while reading tabular input.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("structural code column not found; expected a header containing 'cost code' or 'wbs'")]
    MissingCodeColumn,

    #[error("level column not found; expected a header containing 'level'")]
    MissingLevelColumn,

    #[error("input contains no data rows")]
    Empty,

    #[error("{path}: I/O error: {message}")]
    Io { path: String, message: String },

    #[error("row {row}: {message}")]
    Csv { row: usize, message: String },
}

/// Header → field mapping table.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    aliases: Vec<(ColumnField, String)>,
    rules: Vec<HeaderRule>,
    require_level: bool,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            aliases: Vec::new(),
            rules: DEFAULT_RULES.to_vec(),
            require_level: false,
        }
    }
}

impl ColumnMap {
    /// Add an exact-match alias. Aliases are consulted before the rule table.
    pub fn with_alias(mut self, field: ColumnField, header: impl AsRef<str>) -> Self {
        self.aliases.push((field, normalize_header(header.as_ref())));
        self
    }

    /// Fail resolution when no level column is present.
    pub fn require_level(mut self, require: bool) -> Self {
        self.require_level = require;
        self
    }

    /// Assign header positions to fields.
    pub fn resolve<S: AsRef<str>>(&self, headers: &[S]) -> Result<ColumnBinding, ImportError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        let mut claimed = vec![false; normalized.len()];
        let mut columns = BTreeMap::new();

        for (field, alias) in &self.aliases {
            if columns.contains_key(field) {
                continue;
            }
            if let Some(idx) = (0..normalized.len()).find(|&i| !claimed[i] && normalized[i] == *alias) {
                claimed[idx] = true;
                columns.insert(*field, idx);
            }
        }

        for rule in &self.rules {
            if columns.contains_key(&rule.field) {
                continue;
            }
            if let Some(idx) = (0..normalized.len()).find(|&i| !claimed[i] && rule.matches(&normalized[i])) {
                claimed[idx] = true;
                columns.insert(rule.field, idx);
            }
        }

        if !columns.contains_key(&ColumnField::StructuralCode) {
            return Err(ImportError::MissingCodeColumn);
        }
        if self.require_level && !columns.contains_key(&ColumnField::Level) {
            return Err(ImportError::MissingLevelColumn);
        }

        Ok(ColumnBinding { columns })
    }
}

/// Result of resolving headers: which position feeds which field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    columns: BTreeMap<ColumnField, usize>,
}

impl ColumnBinding {
    pub fn position(&self, field: ColumnField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn has(&self, field: ColumnField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Extract one raw row from positional cells.
    pub fn row<S: AsRef<str>>(&self, row_number: usize, cells: &[S]) -> RawRow {
        let mut values = BTreeMap::new();
        for (field, idx) in &self.columns {
            if let Some(cell) = cells.get(*idx) {
                let value = clean_cell(cell.as_ref());
                if !value.is_empty() {
                    values.insert(*field, value);
                }
            }
        }
        RawRow { row_number, values }
    }
}

/// One data row, keyed by field. Blank and `nan` cells are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based spreadsheet row (header is row 1).
    pub row_number: usize,
    pub values: BTreeMap<ColumnField, String>,
}

impl RawRow {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: ColumnField, value: impl Into<String>) -> Self {
        let value = clean_cell(&value.into());
        if !value.is_empty() {
            self.values.insert(field, value);
        }
        self
    }

    pub fn text(&self, field: ColumnField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn code(&self) -> Option<&str> {
        self.text(ColumnField::StructuralCode)
    }

    /// Numeric cell value; unparseable numbers are treated as absent.
    pub fn decimal(&self, field: ColumnField) -> Option<Decimal> {
        self.text(field).and_then(parse_decimal)
    }

    /// Level cell: `None` when absent, `Some(Err(raw))` when not numeric.
    pub fn level(&self) -> Option<Result<u32, String>> {
        let raw = self.text(ColumnField::Level)?;
        let parsed = parse_decimal(raw)
            .filter(|value| !value.is_sign_negative())
            .and_then(|value| value.trunc().to_u32());
        Some(parsed.ok_or_else(|| raw.to_string()))
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned = raw.trim().replace(',', "");
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_header(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Read comma-separated rows from a reader. The first record is the header.
pub fn read_rows(reader: impl Read, map: &ColumnMap) -> Result<Vec<RawRow>, ImportError> {
    read_delimited(reader, b',', map)
}

/// Read delimited rows from a file. `.tsv` files are tab-separated.
pub fn read_rows_from_path(path: impl AsRef<Path>, map: &ColumnMap) -> Result<Vec<RawRow>, ImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let is_tsv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));
    read_delimited(file, if is_tsv { b'\t' } else { b',' }, map)
}

fn read_delimited(reader: impl Read, delimiter: u8, map: &ColumnMap) -> Result<Vec<RawRow>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| ImportError::Csv {
            row: 1,
            message: e.to_string(),
        })?
        .clone();
    let binding = map.resolve(&headers.iter().collect::<Vec<_>>())?;

    let mut rows = Vec::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let row_number = idx + 2;
        let record = record.map_err(|e| ImportError::Csv {
            row: row_number,
            message: e.to_string(),
        })?;
        let cells: Vec<&str> = record.iter().collect();
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(binding.row(row_number, &cells));
    }

    if rows.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(rows)
}
