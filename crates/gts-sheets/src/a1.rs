//! Minimal A1 notation parsing (`Sheet!A1`, `'My sheet'!A1:Z3`).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported A1 range {0:?}")]
pub struct A1Error(pub String);

/// 0-based cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Range {
    pub sheet: String,
    pub start: CellRef,
    pub end: Option<CellRef>,
}

pub fn parse_range(range: &str) -> Result<A1Range, A1Error> {
    let err = || A1Error(range.to_string());
    let (sheet, cells) = range.rsplit_once('!').ok_or_else(err)?;
    let sheet = match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => sheet.to_string(),
    };
    if sheet.is_empty() {
        return Err(err());
    }

    let (start, end) = match cells.split_once(':') {
        Some((start, end)) => (
            parse_cell(start).ok_or_else(err)?,
            Some(parse_cell(end).ok_or_else(err)?),
        ),
        None => (parse_cell(cells).ok_or_else(err)?, None),
    };
    Ok(A1Range { sheet, start, end })
}

fn parse_cell(cell: &str) -> Option<CellRef> {
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let col = letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
        - 1;
    let row: usize = digits.parse().ok()?;
    Some(CellRef {
        row: row.checked_sub(1)?,
        col,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_cells_and_ranges() {
        let r = parse_range("daily_hours!A2").unwrap();
        assert_eq!(r.sheet, "daily_hours");
        assert_eq!(r.start, CellRef { row: 1, col: 0 });
        assert_eq!(r.end, None);

        let r = parse_range("'KPI ''sheet'''!A1:Z3").unwrap();
        assert_eq!(r.sheet, "KPI 'sheet'");
        assert_eq!(r.end, Some(CellRef { row: 2, col: 25 }));

        assert_eq!(parse_range("S!AA10").unwrap().start, CellRef { row: 9, col: 26 });
    }

    #[test]
    fn rejects_malformed_ranges() {
        for bad in ["A1", "!A1", "S!A0", "S!1", "S!a1", "S!A1:"] {
            assert!(parse_range(bad).is_err(), "{bad}");
        }
    }
}
