//! CSV decoding of downloaded objects.

use gts_core::Dataset;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("csv object is empty")]
    Empty,
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Comma-delimited, `"`-quoted, no header handling. Every record must have as
/// many fields as the first one.
pub fn parse_csv(bytes: &[u8]) -> Result<Dataset, ParseError> {
    let dataset = Dataset::new(read_rows(bytes, false)?);
    if dataset.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(dataset)
}

/// Lenient variant for sheet exports, where trailing empty cells are dropped
/// and rows differ in width.
pub fn parse_rows_flexible(bytes: &[u8]) -> Result<Vec<Vec<String>>, ParseError> {
    read_rows(bytes, true)
}

fn read_rows(bytes: &[u8], flexible: bool) -> Result<Vec<Vec<String>>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .has_headers(false)
        .flexible(flexible)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields_with_commas() {
        let dataset = parse_csv(b"date,users\n2024-01-01,\"1,234\"\n").unwrap();
        assert_eq!(
            dataset.rows,
            vec![
                vec!["date".to_string(), "users".to_string()],
                vec!["2024-01-01".to_string(), "1,234".to_string()],
            ]
        );
    }

    #[test]
    fn empty_input_is_a_parse_failure() {
        assert!(matches!(parse_csv(b""), Err(ParseError::Empty)));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(matches!(parse_csv(b"a,b,c\n1,2\n"), Err(ParseError::Csv(_))));
        assert_eq!(parse_rows_flexible(b"a,b,c\n1,2\n").unwrap()[1].len(), 2);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert!(matches!(parse_csv(b"2024-01-01,\xff\xfe\n"), Err(ParseError::Csv(_))));
    }
}
