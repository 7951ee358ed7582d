//! Strict recognition of the date-like cell values the merge logic keys on.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// Exports write midnight as `0:00:00`, so the hour may be a single digit.
const DATE_TIME_SHAPES: [&str; 2] = ["dddd-dd-dd dd:dd:dd", "dddd-dd-dd d:dd:dd"];
const DATE_SHAPE: &str = "dddd-dd-dd";
const MONTH_SHAPE: &str = "dddd-dd";

/// What kind of date-like value a cell holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    /// `YYYY-MM-DD HH:MM:SS`, hour possibly unpadded
    DateTime,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM`
    Month,
    None,
}

impl CellKind {
    pub fn is_temporal(self) -> bool {
        !matches!(self, CellKind::None)
    }
}

/// Classify a raw cell. The timestamp shape is tried first, so a timestamp is
/// never reported as a plain date.
pub fn classify(s: &str) -> CellKind {
    if DATE_TIME_SHAPES.iter().any(|shape| has_shape(s, shape))
        && NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
    {
        return CellKind::DateTime;
    }
    if has_shape(s, DATE_SHAPE) && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return CellKind::Date;
    }
    if has_shape(s, MONTH_SHAPE)
        && NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_ok()
    {
        return CellKind::Month;
    }
    CellKind::None
}

pub fn is_date(s: &str) -> bool {
    classify(s) == CellKind::Date
}

pub fn is_month(s: &str) -> bool {
    classify(s) == CellKind::Month
}

pub fn is_date_time(s: &str) -> bool {
    classify(s) == CellKind::DateTime
}

/// Clean a CSV cell before it is written: one surrounding double quote on each
/// side is dropped, thousands separators are removed and timestamps are cut
/// down to their date part.
pub fn normalize_cell(raw: &str) -> String {
    let s = raw.strip_prefix('"').unwrap_or(raw);
    let s = s.strip_suffix('"').unwrap_or(s);
    let s = s.replace(',', "");
    match s.split_once(' ') {
        Some((date, _)) if is_date_time(&s) => date.to_string(),
        _ => s,
    }
}

// `d` stands for an ASCII digit, anything else must match byte for byte.
fn has_shape(s: &str, shape: &str) -> bool {
    s.len() == shape.len()
        && s.bytes().zip(shape.bytes()).all(|(c, p)| match p {
            b'd' => c.is_ascii_digit(),
            _ => c == p,
        })
}
