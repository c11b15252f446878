mod delimited;
#[cfg(feature = "pdf")]
mod pdf_text;
#[cfg(feature = "spreadsheet")]
mod spreadsheet;

use chrono::NaiveDate;

use crate::error::{LedgerError, Result, RowError};
use crate::models::RawRow;

pub use delimited::parse_csv;
#[cfg(feature = "pdf")]
pub use pdf_text::parse_pdf;
#[cfg(feature = "spreadsheet")]
pub use spreadsheet::parse_spreadsheet;

/// Lazy, single-pass sequence of source rows. Bad rows come through as
/// `Err` so the caller decides what to do with them.
pub type RowStream = Box<dyn Iterator<Item = std::result::Result<RawRow, RowError>>>;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Fallback date for PDF lines that carry no date of their own.
    pub today: NaiveDate,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            today: chrono::Local::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Spreadsheet,
    Pdf,
}

impl FileFormat {
    /// Resolve a declared file type such as `csv`, `xlsx` or `pdf`.
    pub fn from_declared(file_type: &str) -> Result<Self> {
        match file_type.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" | "txt" => Ok(Self::Csv),
            "xlsx" | "xls" | "xlsm" | "ods" => Ok(Self::Spreadsheet),
            "pdf" => Ok(Self::Pdf),
            other => Err(LedgerError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Guess from a file name's extension.
    pub fn from_filename(name: &str) -> Result<Self> {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Self::from_declared(ext)
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Spreadsheet => "xlsx",
            Self::Pdf => "pdf",
        }
    }

    pub fn parse(&self, data: Vec<u8>, opts: &ParseOptions) -> Result<RowStream> {
        match self {
            Self::Csv => parse_csv(data),
            #[cfg(feature = "spreadsheet")]
            Self::Spreadsheet => parse_spreadsheet(data),
            #[cfg(not(feature = "spreadsheet"))]
            Self::Spreadsheet => Err(LedgerError::UnsupportedFormat(
                "xlsx (built without spreadsheet support)".into(),
            )),
            #[cfg(feature = "pdf")]
            Self::Pdf => parse_pdf(&data, opts),
            #[cfg(not(feature = "pdf"))]
            Self::Pdf => {
                let _ = opts;
                Err(LedgerError::UnsupportedFormat("pdf (built without pdf support)".into()))
            }
        }
    }
}

/// `" Transaction Date "` becomes `transaction_date`.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
