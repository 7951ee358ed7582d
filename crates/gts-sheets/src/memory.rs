//! In-process spreadsheet used for offline runs and tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use gts_core::{RowInsertion, ValueInputMode, WriteBatch};
use tokio::sync::Mutex;

use crate::a1::{parse_range, A1Range};
use crate::{ApiError, SheetsError, SpreadsheetClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetOp {
    Read,
    Write,
    Insert,
}

/// Every mutating call, in order, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetCall {
    Write {
        range: String,
        mode: ValueInputMode,
        rows: usize,
    },
    Insert {
        sheet: String,
        row_number: u32,
        inherit_from_before: bool,
    },
}

#[derive(Debug, Default)]
struct State {
    // Insertion order doubles as sheet id.
    titles: Vec<String>,
    grids: BTreeMap<String, Vec<Vec<String>>>,
    calls: Vec<SheetCall>,
    failing: HashSet<SheetOp>,
}

#[derive(Debug, Default)]
pub struct InMemorySpreadsheet {
    state: Mutex<State>,
}

impl InMemorySpreadsheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a tab with the given cells.
    pub async fn add_sheet(&self, title: &str, rows: Vec<Vec<String>>) {
        let mut state = self.state.lock().await;
        if !state.titles.iter().any(|t| t == title) {
            state.titles.push(title.to_string());
        }
        state.grids.insert(title.to_string(), rows);
    }

    pub async fn rows(&self, title: &str) -> Option<Vec<Vec<String>>> {
        self.state.lock().await.grids.get(title).cloned()
    }

    pub async fn calls(&self) -> Vec<SheetCall> {
        self.state.lock().await.calls.clone()
    }

    /// Make every later call of kind `op` fail.
    pub async fn fail_on(&self, op: SheetOp) {
        self.state.lock().await.failing.insert(op);
    }
}

fn injected(op: SheetOp) -> ApiError {
    ApiError::Injected(format!("{op:?} disabled"))
}

fn grid_mut<'a>(
    state: &'a mut State,
    range: &A1Range,
) -> Result<&'a mut Vec<Vec<String>>, SheetsError> {
    state
        .grids
        .get_mut(&range.sheet)
        .ok_or_else(|| SheetsError::SheetNotFound(range.sheet.clone()))
}

#[async_trait]
impl SpreadsheetClient for InMemorySpreadsheet {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let read_err = |source: ApiError| SheetsError::Read {
            range: range.to_string(),
            source,
        };
        let state = self.state.lock().await;
        if state.failing.contains(&SheetOp::Read) {
            return Err(read_err(injected(SheetOp::Read)));
        }
        let parsed = parse_range(range).map_err(|e| read_err(e.into()))?;
        let grid = state
            .grids
            .get(&parsed.sheet)
            .ok_or_else(|| read_err(ApiError::Injected(format!("no sheet {}", parsed.sheet))))?;

        let end = parsed.end.unwrap_or(parsed.start);
        let mut out: Vec<Vec<String>> = grid
            .iter()
            .skip(parsed.start.row)
            .take(end.row + 1 - parsed.start.row.min(end.row + 1))
            .map(|row| {
                let mut cells: Vec<String> = row
                    .iter()
                    .skip(parsed.start.col)
                    .take(end.col + 1 - parsed.start.col.min(end.col + 1))
                    .cloned()
                    .collect();
                while cells.last().is_some_and(|c| c.is_empty()) {
                    cells.pop();
                }
                cells
            })
            .collect();
        while out.last().is_some_and(|row| row.is_empty()) {
            out.pop();
        }
        Ok(out)
    }

    async fn write_range(
        &self,
        range: &str,
        rows: &WriteBatch,
        mode: ValueInputMode,
    ) -> Result<(), SheetsError> {
        let write_err = |source: ApiError| SheetsError::Write {
            range: range.to_string(),
            source,
        };
        let mut state = self.state.lock().await;
        if state.failing.contains(&SheetOp::Write) {
            return Err(write_err(injected(SheetOp::Write)));
        }
        let parsed = parse_range(range).map_err(|e| write_err(e.into()))?;
        let grid = grid_mut(&mut state, &parsed)?;

        for (offset, row) in rows.iter().enumerate() {
            let r = parsed.start.row + offset;
            if grid.len() <= r {
                grid.resize(r + 1, Vec::new());
            }
            for (c_offset, cell) in row.iter().enumerate() {
                let c = parsed.start.col + c_offset;
                let target = &mut grid[r];
                if target.len() <= c {
                    target.resize(c + 1, String::new());
                }
                target[c] = cell.as_str().to_string();
            }
        }

        state.calls.push(SheetCall::Write {
            range: range.to_string(),
            mode,
            rows: rows.len(),
        });
        Ok(())
    }

    async fn sheet_id(&self, title: &str) -> Result<i64, SheetsError> {
        let state = self.state.lock().await;
        state
            .titles
            .iter()
            .position(|t| t == title)
            .map(|idx| idx as i64)
            .ok_or_else(|| SheetsError::SheetNotFound(title.to_string()))
    }

    async fn insert_row(&self, sheet: &str, insertion: RowInsertion) -> Result<(), SheetsError> {
        self.sheet_id(sheet).await?;
        let mut state = self.state.lock().await;
        if state.failing.contains(&SheetOp::Insert) {
            return Err(SheetsError::Insert {
                sheet: sheet.to_string(),
                row_number: insertion.row_number,
                source: injected(SheetOp::Insert),
            });
        }
        let (start, _) = insertion.index_range();
        let grid = state
            .grids
            .get_mut(sheet)
            .ok_or_else(|| SheetsError::SheetNotFound(sheet.to_string()))?;
        let start = start as usize;
        if grid.len() < start {
            grid.resize(start, Vec::new());
        }
        grid.insert(start, Vec::new());

        state.calls.push(SheetCall::Insert {
            sheet: sheet.to_string(),
            row_number: insertion.row_number,
            inherit_from_before: insertion.inherit_from_before,
        });
        Ok(())
    }
}
