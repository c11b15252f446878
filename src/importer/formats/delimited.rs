use std::io::Cursor;

use super::{normalize_header, RowStream};
use crate::error::{LedgerError, Result, RowError};
use crate::models::{RawRow, RawValue};

/// Header row names the fields; every later record becomes one row.
pub fn parse_csv(data: Vec<u8>) -> Result<RowStream> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(Cursor::new(data));

    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(LedgerError::Parse {
            format: "csv",
            message: "missing header row".into(),
        });
    }

    let rows = rdr.into_records().enumerate().map(move |(i, result)| {
        let fallback = i + 2;
        let record = result.map_err(|e| RowError::Malformed {
            row: e
                .position()
                .map_or(fallback, |p| p.line() as usize),
            message: e.to_string(),
        })?;
        let row_number = record.position().map_or(fallback, |p| p.line() as usize);
        if record.len() > headers.len() {
            return Err(RowError::Malformed {
                row: row_number,
                message: format!("expected {} fields, found {}", headers.len(), record.len()),
            });
        }

        let mut row = RawRow::new(row_number);
        for (name, value) in headers.iter().zip(record.iter()) {
            if name.is_empty() {
                continue;
            }
            let value = if value.is_empty() {
                RawValue::Empty
            } else {
                RawValue::Text(value.to_string())
            };
            row.fields.insert(name.clone(), value);
        }
        Ok(row)
    });

    Ok(Box::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(content: &str) -> Vec<std::result::Result<RawRow, RowError>> {
        parse_csv(content.as_bytes().to_vec()).unwrap().collect()
    }

    #[test]
    fn test_header_defines_field_names() {
        let rows = collect("Date,Description,Amount\n2024-03-15,Coffee Shop,-4.50\n");
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.row_number, 2);
        assert_eq!(row.fields["description"], RawValue::Text("Coffee Shop".into()));
        assert_eq!(row.fields["amount"], RawValue::Text("-4.50".into()));
    }

    #[test]
    fn test_quoted_amounts_keep_separators() {
        let rows = collect("date,description,amount\n03/15/2024,DEPOSIT,\"1,234.56\"\n");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.fields["amount"], RawValue::Text("1,234.56".into()));
    }

    #[test]
    fn test_blank_cells_are_empty() {
        let rows = collect("date,description,amount,category\n2024-01-02,Rent,-900.00,\n");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.fields["category"], RawValue::Empty);
    }

    #[test]
    fn test_extra_fields_are_malformed_but_stream_continues() {
        let rows = collect(
            "date,description,amount\n2024-01-02,One,1.00\n2024-01-03,Two,2.00,oops\n2024-01-04,Three,3.00\n",
        );
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(RowError::Malformed { row: 3, .. })));
        assert!(rows[2].is_ok());
    }

    #[test]
    fn test_missing_header_is_structural() {
        assert!(matches!(
            parse_csv(Vec::new()),
            Err(LedgerError::Parse { format: "csv", .. })
        ));
    }
}
