use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::error::RowError;
use crate::models::{NormalizedRow, RawRow, RawValue};
use crate::settings::DEFAULT_DATE_FORMATS;

const DESCRIPTION: &[&str] = &["description", "desc", "payee", "memo", "name"];
const AMOUNT: &[&str] = &["amount", "value", "amt"];
const DATE: &[&str] = &["date", "transaction_date", "trans_date"];
const POSTED_DATE: &[&str] = &["posted_date", "post_date", "posting_date"];
const REFERENCE: &[&str] = &["reference", "ref", "reference_number"];
const CHECK_NUMBER: &[&str] = &["check_number", "check_no", "check", "cheque_number"];
const NOTES: &[&str] = &["notes", "note", "comments"];
const CATEGORY: &[&str] = &["category"];
const TAGS: &[&str] = &["tags", "tag"];

/// Serial of 9999-12-31, the last day Excel can represent.
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Excel serial day number to calendar date (epoch 1899-12-30).
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(0.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(chrono::Duration::try_days(serial.trunc() as i64)?)
}

/// Strip currency symbols, thousands separators and quotes, then parse as
/// an exact decimal. `(12.00)` is negative.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | '"') && !c.is_whitespace())
        .collect();
    if let Some(inner) = cleaned.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return Decimal::from_str(inner).ok().map(|d| -d);
    }
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(cleaned).ok()
}

/// First format that parses wins. `%Y` only matches four-digit years, so
/// `03/15/24` is not read as the year 24.
pub fn parse_date<S: AsRef<str>>(raw: &str, formats: &[S]) -> Option<NaiveDate> {
    let raw = raw.trim();
    formats.iter().find_map(|fmt| {
        let fmt = fmt.as_ref();
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .filter(|d| !fmt.contains("%Y") || d.year() >= 1000)
    })
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn text_of(value: Option<&RawValue>) -> Option<String> {
    value.map(|v| v.to_string().trim().to_string()).filter(|s| !s.is_empty())
}

/// Validates raw rows into `NormalizedRow`s.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    date_formats: Vec<String>,
}

impl Default for RowNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect())
    }
}

impl RowNormalizer {
    pub fn new(date_formats: Vec<String>) -> Self {
        Self { date_formats }
    }

    /// Accept exactly one date format, with no fallback guessing.
    pub fn with_explicit_format(format: &str) -> Self {
        Self::new(vec![format.to_string()])
    }

    fn date_value(&self, value: &RawValue) -> Option<NaiveDate> {
        match value {
            RawValue::Date(d) => Some(*d),
            RawValue::Number(n) => excel_serial_to_date(*n),
            RawValue::Text(s) => parse_date(s, &self.date_formats),
            RawValue::Empty => None,
        }
    }

    fn amount_value(value: &RawValue) -> Option<Decimal> {
        match value {
            RawValue::Number(n) if n.is_finite() => Decimal::from_str(&n.to_string()).ok(),
            RawValue::Text(s) => parse_amount(s),
            _ => None,
        }
    }

    pub fn normalize(&self, raw: RawRow) -> Result<NormalizedRow, RowError> {
        let row = raw.row_number;

        let description = text_of(raw.lookup(DESCRIPTION)).ok_or(RowError::MissingField {
            row,
            field: "description",
        })?;

        let amount_raw = raw
            .lookup(AMOUNT)
            .ok_or(RowError::MissingField { row, field: "amount" })?;
        let amount = Self::amount_value(amount_raw).ok_or_else(|| RowError::InvalidAmount {
            row,
            value: amount_raw.to_string(),
        })?;

        let date_raw = raw
            .lookup(DATE)
            .ok_or(RowError::MissingField { row, field: "date" })?;
        let transaction_date = self.date_value(date_raw).ok_or_else(|| RowError::InvalidDate {
            row,
            value: date_raw.to_string(),
        })?;

        let posted_date = raw.lookup(POSTED_DATE).and_then(|v| self.date_value(v));
        let tags = text_of(raw.lookup(TAGS))
            .map(|t| split_tags(&t))
            .unwrap_or_default();

        Ok(NormalizedRow {
            row_number: row,
            description,
            amount,
            transaction_date,
            posted_date,
            reference: text_of(raw.lookup(REFERENCE)),
            check_number: text_of(raw.lookup(CHECK_NUMBER)),
            notes: text_of(raw.lookup(NOTES)),
            category: text_of(raw.lookup(CATEGORY)),
            tags,
            raw,
        })
    }
}
