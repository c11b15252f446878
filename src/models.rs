use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Import jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Status only ever moves forward.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ImportJob {
    pub id: i64,
    pub owner: String,
    pub filename: String,
    pub file_type: String,
    pub status: ImportStatus,
    pub total_records: i64,
    pub processed_records: i64,
    pub failed_records: i64,
    pub error_log: Vec<String>,
    pub checksum: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Best-effort cell value as produced by a format parser.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Empty,
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(n) => n.is_nan(),
            Self::Date(_) => false,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Empty => Ok(()),
        }
    }
}

/// One source record keyed by normalized header name.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based position in the source (header row included for tabular files).
    pub row_number: usize,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRow {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: RawValue) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// First non-empty value among `aliases`.
    pub fn lookup(&self, aliases: &[&str]) -> Option<&RawValue> {
        aliases
            .iter()
            .filter_map(|k| self.fields.get(*k))
            .find(|v| !v.is_empty())
    }
}

/// A validated statement line, ready to be materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub row_number: usize,
    pub description: String,
    pub amount: Decimal,
    pub transaction_date: NaiveDate,
    pub posted_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub check_number: Option<String>,
    pub notes: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Source fields as read, kept for diagnostics.
    pub raw: RawRow,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    /// Imported rows take their type from the sign of the amount.
    pub fn from_amount(amount: Decimal) -> Self {
        if amount < Decimal::ZERO {
            Self::Expense
        } else {
            Self::Income
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub category_id: Option<i64>,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub is_reconciled: bool,
    pub import_id: Option<i64>,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: i64,
    pub owner: String,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub secret: Option<String>,
    pub retry_count: i64,
    pub timeout_secs: u64,
    pub failure_count: i64,
    pub last_triggered: Option<DateTime<Utc>>,
}

impl Webhook {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == event_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "retrying" => Some(Self::Retrying),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub id: i64,
    pub webhook_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub next_retry: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Timestamp column format (RFC 3339, second precision, UTC).
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert!(ImportStatus::Pending.can_transition_to(ImportStatus::Processing));
        assert!(ImportStatus::Processing.can_transition_to(ImportStatus::Completed));
        assert!(!ImportStatus::Completed.can_transition_to(ImportStatus::Processing));
        assert!(!ImportStatus::Processing.can_transition_to(ImportStatus::Pending));
        assert!(!ImportStatus::Failed.can_transition_to(ImportStatus::Cancelled));
    }

    #[test]
    fn test_transaction_type_from_amount() {
        assert_eq!(TransactionType::from_amount(Decimal::new(-450, 2)), TransactionType::Expense);
        assert_eq!(TransactionType::from_amount(Decimal::ZERO), TransactionType::Income);
        assert_eq!(TransactionType::from_amount(Decimal::new(100, 0)), TransactionType::Income);
    }

    #[test]
    fn test_lookup_skips_empty_aliases() {
        let row = RawRow::new(2)
            .with("desc", RawValue::Text("  ".into()))
            .with("description", RawValue::Text("Coffee".into()));
        assert_eq!(
            row.lookup(&["desc", "description"]),
            Some(&RawValue::Text("Coffee".into()))
        );
        assert_eq!(row.lookup(&["amount"]), None);
    }

    #[test]
    fn test_nan_number_is_empty() {
        assert!(RawValue::Number(f64::NAN).is_empty());
        assert!(!RawValue::Number(0.0).is_empty());
    }
}
