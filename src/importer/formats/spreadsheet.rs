use std::io::Cursor;

use calamine::{Data, Range, Reader};
use chrono::NaiveDate;

use super::{normalize_header, RowStream};
use crate::error::{LedgerError, Result};
use crate::importer::normalizer::excel_serial_to_date;
use crate::models::{RawRow, RawValue};

/// Typed cell to row value. NaN, blank and error cells count as missing.
pub fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty | Data::Error(_) => RawValue::Empty,
        Data::String(s) if s.trim().is_empty() => RawValue::Empty,
        Data::String(s) if s.trim().eq_ignore_ascii_case("nan") => RawValue::Empty,
        Data::String(s) => RawValue::Text(s.trim().to_string()),
        Data::Float(f) if f.is_nan() => RawValue::Empty,
        Data::Float(f) => RawValue::Number(*f),
        Data::Int(i) => RawValue::Number(*i as f64),
        Data::Bool(b) => RawValue::Text(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map_or(RawValue::Empty, RawValue::Date),
        Data::DateTimeIso(s) => NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
            .map_or_else(|_| RawValue::Text(s.clone()), RawValue::Date),
        Data::DurationIso(s) => RawValue::Text(s.clone()),
    }
}

/// First worksheet; first row is the header.
pub fn parse_spreadsheet(data: Vec<u8>) -> Result<RowStream> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data)).map_err(|e| {
        LedgerError::Parse {
            format: "spreadsheet",
            message: e.to_string(),
        }
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LedgerError::Parse {
            format: "spreadsheet",
            message: "workbook has no worksheets".into(),
        })?
        .map_err(|e| LedgerError::Parse {
            format: "spreadsheet",
            message: e.to_string(),
        })?;

    rows_from_range(range)
}

/// Lazy rows of a worksheet range whose first row is the header.
fn rows_from_range(range: Range<Data>) -> Result<RowStream> {
    let headers: Vec<String> = range
        .rows()
        .next()
        .map(|r| r.iter().map(|c| normalize_header(&c.to_string())).collect())
        .unwrap_or_default();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(LedgerError::Parse {
            format: "spreadsheet",
            message: "missing header row".into(),
        });
    }

    // The range is moved into the iterator so rows are built on demand.
    let records = (1..range.height()).filter_map(move |r| {
        let mut row = RawRow::new(r + 1);
        for (c, name) in headers.iter().enumerate() {
            if !name.is_empty() {
                let value = range.get((r, c)).map_or(RawValue::Empty, cell_value);
                row.fields.insert(name.clone(), value);
            }
        }
        // Entirely blank lines are layout, not data.
        if row.fields.values().all(RawValue::is_empty) {
            None
        } else {
            Some(Ok(row))
        }
    });

    Ok(Box::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_and_blank_cells_are_missing() {
        assert_eq!(cell_value(&Data::Float(f64::NAN)), RawValue::Empty);
        assert_eq!(cell_value(&Data::String("   ".into())), RawValue::Empty);
        assert_eq!(cell_value(&Data::String("NaN".into())), RawValue::Empty);
        assert_eq!(cell_value(&Data::Empty), RawValue::Empty);
    }

    #[test]
    fn test_native_numbers_stay_numeric() {
        assert_eq!(cell_value(&Data::Float(-12.5)), RawValue::Number(-12.5));
        assert_eq!(cell_value(&Data::Int(40)), RawValue::Number(40.0));
        assert_eq!(cell_value(&Data::String(" Rent ".into())), RawValue::Text("Rent".into()));
    }

    #[test]
    fn test_iso_datetime_cell_becomes_date() {
        assert_eq!(
            cell_value(&Data::DateTimeIso("2024-03-15T00:00:00".into())),
            RawValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
    }

    #[test]
    fn test_range_rows_skip_blank_lines() {
        let mut range = Range::new((0, 0), (3, 2));
        range.set_value((0, 0), Data::String("Date".into()));
        range.set_value((0, 1), Data::String("Description".into()));
        range.set_value((0, 2), Data::String("Amount".into()));
        range.set_value((1, 0), Data::String("2024-03-15".into()));
        range.set_value((1, 1), Data::String("Coffee".into()));
        range.set_value((1, 2), Data::Float(-4.5));
        range.set_value((3, 1), Data::String("Rent".into()));
        range.set_value((3, 2), Data::Float(f64::NAN));

        let rows: Vec<RawRow> = rows_from_range(range).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_number, 2);
        assert_eq!(rows[0].fields["amount"], RawValue::Number(-4.5));
        assert_eq!(rows[1].row_number, 4);
        assert_eq!(rows[1].fields["description"], RawValue::Text("Rent".into()));
        assert_eq!(rows[1].fields["amount"], RawValue::Empty);
    }

    #[test]
    fn test_range_without_header_is_structural() {
        let range: Range<Data> = Range::new((0, 0), (1, 1));
        assert!(matches!(
            rows_from_range(range),
            Err(LedgerError::Parse { format: "spreadsheet", .. })
        ));
    }

    #[test]
    fn test_garbage_bytes_are_structural() {
        assert!(matches!(
            parse_spreadsheet(b"not a workbook".to_vec()),
            Err(LedgerError::Parse { format: "spreadsheet", .. })
        ));
    }
}
