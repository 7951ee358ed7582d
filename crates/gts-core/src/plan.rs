//! Row placement for an upload merged into the top of a dashboard sheet.
//!
//! Dashboards keep their newest data at the top, directly below the header
//! rows. The first date-like cell in the sheet's top rows marks where the
//! previous upload starts. An upload carrying the same top date is a re-run
//! and overwrites those rows in place; an upload with a different top date
//! pushes the old rows down by one blank row before it is written.

use serde::{Deserialize, Serialize};

use crate::classify::{classify, normalize_cell, CellKind};
use crate::{
    a1_row_start, CellValue, DashboardName, Dataset, SheetSnapshot, ValueInputMode, WriteBatch,
};

/// First date-like cell of the existing sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopDate {
    pub value: String,
    /// 0-based row index inside the snapshot.
    pub row_index: usize,
}

impl TopDate {
    /// Locate the merge anchor: rows in order, cells in order, first match wins.
    pub fn find(snapshot: &SheetSnapshot) -> Option<Self> {
        snapshot.rows.iter().enumerate().find_map(|(row_index, row)| {
            row.iter()
                .find(|cell| classify(cell).is_temporal())
                .map(|cell| TopDate {
                    value: cell.clone(),
                    row_index,
                })
        })
    }

    /// 1-based row number of the anchor in A1 notation.
    pub fn row_number(&self) -> u32 {
        self.row_index as u32 + 1
    }
}

/// Blank row to open up before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowInsertion {
    /// 1-based row the blank row will occupy.
    pub row_number: u32,
    pub inherit_from_before: bool,
}

impl RowInsertion {
    /// 0-based, end-exclusive index pair used by dimension requests.
    pub fn index_range(&self) -> (u32, u32) {
        (self.row_number - 1, self.row_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub dashboard: DashboardName,
    pub top_date: Option<TopDate>,
    pub insertion: Option<RowInsertion>,
    /// 1-based row the first batch row lands on.
    pub start_row: u32,
    pub value_input: ValueInputMode,
    pub rows: WriteBatch,
    pub refresh_summary: bool,
}

impl MergePlan {
    pub fn write_range(&self) -> String {
        a1_row_start(self.dashboard.as_str(), self.start_row)
    }
}

pub fn plan_merge(
    dashboard: &DashboardName,
    snapshot: &SheetSnapshot,
    dataset: &Dataset,
    kpi_dashboard: &str,
) -> MergePlan {
    let sheet_empty = snapshot.is_empty();
    let top_date = TopDate::find(snapshot);

    let start_row = match (&top_date, sheet_empty) {
        (_, true) => 1,
        (Some(top), false) => top.row_number(),
        // Only headers so far: continue directly below them.
        (None, false) => snapshot.rows.len() as u32 + 1,
    };

    let mut insertion = None;
    let mut seen_new_top = false;
    let mut rows: WriteBatch = Vec::new();

    for row in &dataset.rows {
        if !sheet_empty && !seen_new_top {
            if let Some(cell) = row.iter().find(|cell| classify(cell).is_temporal()) {
                seen_new_top = true;
                if let Some(top) = &top_date {
                    if normalize_cell(cell) != normalize_cell(&top.value) {
                        insertion = Some(RowInsertion {
                            row_number: top.row_number(),
                            inherit_from_before: true,
                        });
                    }
                }
            }
        }

        let first_kind = row.first().map_or(CellKind::None, |cell| classify(cell));
        if !(sheet_empty || first_kind.is_temporal()) || row.is_empty() {
            continue;
        }

        let row_number = start_row + rows.len() as u32;
        let mut cells: Vec<CellValue> = row
            .iter()
            .map(|cell| CellValue::Text(normalize_cell(cell)))
            .collect();

        if first_kind == CellKind::Date && matches!(row.len(), 4 | 5) {
            if row.len() == 4 {
                cells.push(CellValue::Text(String::new()));
            }
            cells.push(CellValue::Formula(format!("=SUM(B{row_number}:E{row_number})")));
        }

        rows.push(cells);
    }

    MergePlan {
        dashboard: dashboard.clone(),
        top_date,
        insertion,
        start_row,
        value_input: ValueInputMode::UserEntered,
        rows,
        refresh_summary: dashboard.as_str() == kpi_dashboard,
    }
}
