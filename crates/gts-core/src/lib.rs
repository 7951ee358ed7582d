//! Core domain model and merge rules for GTS (GCS to Sheets).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod classify;
pub mod plan;
pub mod summary;

pub use classify::{classify, is_date, is_date_time, is_month, normalize_cell, CellKind};
pub use plan::{plan_merge, MergePlan, RowInsertion, TopDate};
pub use summary::{SummaryPlan, SUMMARY_SHEET};

pub const CRATE_NAME: &str = "gts-core";

/// Dashboard whose upload also refreshes the Summary sheet.
pub const DEFAULT_KPI_DASHBOARD: &str = "svod_subscriptions_kpi";

/// Columns A..Z of the first three rows are enough to find the top date.
pub const SNAPSHOT_RANGE: &str = "A1:Z3";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DashboardNameError {
    #[error("object path {0:?} does not name a dashboard")]
    Empty(String),
}

/// Name of the sheet tab an uploaded CSV belongs to, e.g. `daily_hours` for
/// `exports/daily_hours-1674409641.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DashboardName(String);

impl DashboardName {
    pub fn from_object_path(object_path: &str) -> Result<Self, DashboardNameError> {
        let file_name = object_path.rsplit('/').next().unwrap_or(object_path);
        let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);
        let name = stem.split('-').next().unwrap_or(stem);
        if name.is_empty() {
            return Err(DashboardNameError::Empty(object_path.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DashboardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed CSV upload: rows of string cells, all as wide as the first record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.is_empty())
    }
}

/// Top rows of the target sheet as they were just before the merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub rows: Vec<Vec<String>>,
}

impl SheetSnapshot {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single cell sent to the spreadsheet. Both variants go over the wire as
/// plain strings; formulas are only evaluated under user-entered input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Formula(String),
}

impl CellValue {
    pub fn as_str(&self) -> &str {
        match self {
            CellValue::Text(s) | CellValue::Formula(s) => s,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

pub type WriteBatch = Vec<Vec<CellValue>>;

/// How the spreadsheet interprets written values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueInputMode {
    UserEntered,
    Raw,
}

impl ValueInputMode {
    pub fn as_api_str(self) -> &'static str {
        match self {
            ValueInputMode::UserEntered => "USER_ENTERED",
            ValueInputMode::Raw => "RAW",
        }
    }
}

/// A1 reference to column A of a 1-based row, quoting the sheet name when needed.
pub fn a1_row_start(sheet: &str, row_number: u32) -> String {
    format!("{}!A{row_number}", quote_sheet_name(sheet))
}

/// A1 range on `sheet`, e.g. `daily_hours!A1:Z3`.
pub fn a1_range(sheet: &str, cells: &str) -> String {
    format!("{}!{cells}", quote_sheet_name(sheet))
}

pub fn quote_sheet_name(sheet: &str) -> String {
    if !sheet.is_empty() && sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_name_from_object_path() {
        let name = DashboardName::from_object_path("daily_hours-1674409641.csv").unwrap();
        assert_eq!(name.as_str(), "daily_hours");
        let nested = DashboardName::from_object_path("exports/2024/svod_users_us-1.csv").unwrap();
        assert_eq!(nested.as_str(), "svod_users_us");
        let plain = DashboardName::from_object_path("us_new_users.csv").unwrap();
        assert_eq!(plain.to_string(), "us_new_users");
    }

    #[test]
    fn dashboard_name_must_not_be_empty() {
        assert!(DashboardName::from_object_path("-1674409641.csv").is_err());
        assert!(DashboardName::from_object_path("exports/").is_err());
        assert!(DashboardName::from_object_path("").is_err());
    }

    #[test]
    fn a1_addresses_quote_unusual_sheet_names() {
        assert_eq!(a1_row_start("daily_hours", 2), "daily_hours!A2");
        assert_eq!(a1_range("Summary", "A1:Z3"), "Summary!A1:Z3");
        assert_eq!(a1_row_start("KPI sheet", 1), "'KPI sheet'!A1");
        assert_eq!(quote_sheet_name("Bob's"), "'Bob''s'");
    }

    #[test]
    fn cell_values_serialize_as_plain_strings() {
        let row = vec![CellValue::from("2024-01-01"), CellValue::Formula("=SUM(B2:E2)".into())];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"["2024-01-01","=SUM(B2:E2)"]"#);
    }
}
