//! Read-only tabular sales data
//!
//! Loaded once from CSV and shared by the analytics, forecasting and
//! router components. Columns are resolved case-insensitively and through
//! a small alias table so callers can speak in business terms ("sales",
//! "units", "region") instead of raw header names.

use crate::Result;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Logical field names used by the tools
pub const ITEM_FIELD: &str = "item";
pub const DATE_FIELD: &str = "date";
pub const QUANTITY_FIELD: &str = "quantity";
pub const STATUS_FIELD: &str = "status";
pub const REGION_FIELD: &str = "region";

/// Business term → header name in the sales report
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("sales", "Amount"),
    ("revenue", "Amount"),
    ("total sales", "Amount"),
    ("gross sales", "Amount"),
    ("quantity", "Qty"),
    ("units", "Qty"),
    ("qty", "Qty"),
    ("item", "Category"),
    ("product", "Category"),
    ("category", "Category"),
    ("region", "ship-state"),
    ("state", "ship-state"),
    ("city", "ship-city"),
    ("date", "Date"),
    ("status", "Status"),
];

const DATE_FORMATS: &[&str] = &["%m-%d-%y", "%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%m/%d/%y"];

pub struct SalesTable {
    headers: Vec<String>,
    records: Vec<Vec<String>>,
}

impl SalesTable {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            crate::error::OrchestrationError::Data(format!(
                "cannot open sales data {}: {}",
                path.display(),
                e
            ))
        })?;

        let table = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            records = table.len(),
            columns = table.headers.len(),
            "Sales data loaded"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();

        let mut records = Vec::new();
        for row in csv_reader.records() {
            let row = row?;
            let mut cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            cells.resize(headers.len(), String::new());
            records.push(cells);
        }

        Ok(Self::from_rows(headers, records))
    }

    /// Builds a table from already split rows. Duplicate orders are dropped.
    pub fn from_rows(headers: Vec<String>, records: Vec<Vec<String>>) -> Self {
        let mut table = Self { headers, records };
        table.drop_duplicate_orders();
        table
    }

    /// Same (Order ID, ASIN) pair counts once, first occurrence wins
    fn drop_duplicate_orders(&mut self) {
        let (Some(order_idx), Some(asin_idx)) = (
            self.exact_column("Order ID"),
            self.exact_column("ASIN"),
        ) else {
            return;
        };

        let before = self.records.len();
        let mut seen = HashSet::with_capacity(before);
        self.records.retain(|r| seen.insert((r[order_idx].clone(), r[asin_idx].clone())));

        if self.records.len() != before {
            debug!(
                dropped = before - self.records.len(),
                "Dropped duplicate order rows"
            );
        }
    }

    fn exact_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    /// Resolve a field name to a column index: exact header, alias, then
    /// a punctuation-insensitive match ("ship state" → "ship-state").
    pub fn resolve_column(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        if let Some(idx) = self.exact_column(wanted) {
            return Some(idx);
        }

        let lowered = wanted.to_lowercase();
        if let Some(idx) = COLUMN_ALIASES
            .iter()
            .filter(|(alias, _)| *alias == lowered)
            .find_map(|(_, header)| self.exact_column(header))
        {
            return Some(idx);
        }

        let squashed = squash(wanted);
        self.headers.iter().position(|h| squash(h) == squashed)
    }

    pub fn column_name(&self, idx: usize) -> &str {
        &self.headers[idx]
    }

    pub fn columns(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.records.iter().map(|cells| Record { cells })
    }

    /// Distinct non-empty values of a field, sorted
    pub fn distinct_values(&self, field: &str) -> Vec<String> {
        let Some(idx) = self.resolve_column(field) else {
            return Vec::new();
        };

        self.records
            .iter()
            .map(|r| r[idx].as_str())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Borrowed view of one sales record
#[derive(Clone, Copy)]
pub struct Record<'a> {
    cells: &'a [String],
}

impl<'a> Record<'a> {
    pub fn get(&self, idx: usize) -> &'a str {
        self.cells.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Numeric cell; unparsable or empty values count as zero
    pub fn number(&self, idx: usize) -> f64 {
        self.get(idx).replace(',', "").parse::<f64>().unwrap_or(0.0)
    }

    pub fn date(&self, idx: usize) -> Option<NaiveDate> {
        parse_date(self.get(idx))
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}
