//! The daily row of the `Summary` sheet, pulled together from other dashboards.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::plan::RowInsertion;
use crate::{a1_row_start, CellValue, ValueInputMode, WriteBatch};

pub const SUMMARY_SHEET: &str = "Summary";

/// Row 1 holds the headers; the newest day always goes to row 2.
const SUMMARY_ROW: u32 = 2;

const SUMMARY_FORMULAS: [&str; 9] = [
    "=VLOOKUP(A2,daily_hours!A:F,6,FALSE)",
    "=VLOOKUP(A2,daily_users!A:F,6,FALSE)",
    "=VLOOKUP(A2,svod_daily_users!A:F,6,FALSE)",
    "=VLOOKUP(A2,svod_daily_hours!A:F,6,FALSE)",
    "=SUM(svod_subscriptions_kpi!B3:D3)",
    "=F2-H2",
    "=svod_users_us!I2+svod_users_mx!I2+svod_users_rolac!I2",
    "=E2/D2",
    "=(B2-E2)/(C2-D2)",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPlan {
    pub sheet: String,
    pub insertion: RowInsertion,
    pub value_input: ValueInputMode,
    pub rows: WriteBatch,
}

impl SummaryPlan {
    /// Summary for the day before `today` (UTC calendar day).
    pub fn for_day(today: NaiveDate) -> Self {
        let reported = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let mut row = Vec::with_capacity(SUMMARY_FORMULAS.len() + 1);
        row.push(CellValue::Text(reported.format("%Y-%m-%d").to_string()));
        row.extend(
            SUMMARY_FORMULAS
                .iter()
                .map(|formula| CellValue::Formula((*formula).to_string())),
        );

        Self {
            sheet: SUMMARY_SHEET.to_string(),
            insertion: RowInsertion {
                row_number: SUMMARY_ROW,
                inherit_from_before: false,
            },
            value_input: ValueInputMode::UserEntered,
            rows: vec![row],
        }
    }

    pub fn write_range(&self) -> String {
        a1_row_start(&self.sheet, SUMMARY_ROW)
    }
}
