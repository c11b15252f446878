use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::{ParseOptions, RowStream};
use crate::error::{LedgerError, Result};
use crate::models::{RawRow, RawValue};

const HEADER_WORDS: &[&str] = &[
    "date", "description", "amount", "balance", "debit", "debits", "credit", "credits",
    "posted", "posting", "transaction", "transactions", "details", "reference", "withdrawals",
    "deposits",
];

const HEADER_PREFIXES: &[&str] = &[
    "page ",
    "statement period",
    "account number",
    "beginning balance",
    "ending balance",
    "opening balance",
    "closing balance",
];

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[$]?-?[\d,]+\.\d{2}").expect("valid amount regex"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\b").expect("valid date regex")
    })
}

fn is_header_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    if HEADER_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| HEADER_WORDS.contains(&w))
}

/// One text line to a candidate row, if it looks like a transaction.
pub fn scan_line(line: &str, row_number: usize, today: NaiveDate) -> Option<RawRow> {
    let line = line.trim();
    if line.chars().count() < 3 || is_header_line(line) {
        return None;
    }
    let amount = amount_re().find(line)?;

    let date_token = date_re().find(line);
    let mut description = line[..amount.start()].to_string();
    if let Some(token) = date_token.filter(|t| t.end() <= amount.start()) {
        description.replace_range(token.range(), "");
    }
    let description = description.split_whitespace().collect::<Vec<_>>().join(" ");

    let date = match date_token {
        Some(token) => RawValue::Text(token.as_str().to_string()),
        None => RawValue::Date(today),
    };

    Some(
        RawRow::new(row_number)
            .with(
                "description",
                if description.is_empty() {
                    RawValue::Empty
                } else {
                    RawValue::Text(description)
                },
            )
            .with("amount", RawValue::Text(amount.as_str().to_string()))
            .with("date", date),
    )
}

pub fn rows_from_text(text: &str, today: NaiveDate) -> Vec<RawRow> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| scan_line(line, i + 1, today))
        .collect()
}

pub fn parse_pdf(data: &[u8], opts: &ParseOptions) -> Result<RowStream> {
    let text = pdf_extract::extract_text_from_mem(data).map_err(|e| LedgerError::Parse {
        format: "pdf",
        message: e.to_string(),
    })?;
    let rows = rows_from_text(&text, opts.today);
    tracing::debug!(candidates = rows.len(), "scanned pdf text");
    Ok(Box::new(rows.into_iter().map(Ok)))
}
