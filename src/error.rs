use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("File {name} is {size} bytes, limit is {limit}")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Could not parse {format} document: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Unknown import job: {0}")]
    UnknownImport(i64),

    #[error("Import {id} cannot move from {from} to {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    #[error("Unknown webhook: {0}")]
    UnknownWebhook(i64),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(i64),

    #[error("Invalid configuration:\n  {}", .0.join("\n  "))]
    Config(Vec<String>),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl LedgerError {
    /// Errors that abort a whole import rather than a single row.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_)
                | Self::EmptyFile(_)
                | Self::FileTooLarge { .. }
                | Self::UnsupportedFormat(_)
                | Self::Parse { .. }
                | Self::Io(_)
                | Self::Csv(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A problem confined to one statement row. The row is skipped and the
/// import carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("Row {row}: missing required field '{field}'")]
    MissingField { row: usize, field: &'static str },

    #[error("Row {row}: invalid amount '{value}'")]
    InvalidAmount { row: usize, value: String },

    #[error("Row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("Row {row}: malformed record: {message}")]
    Malformed { row: usize, message: String },

    #[error("Row {row}: could not save transaction: {message}")]
    Persist { row: usize, message: String },
}

impl RowError {
    pub fn row(&self) -> usize {
        match self {
            Self::MissingField { row, .. }
            | Self::InvalidAmount { row, .. }
            | Self::InvalidDate { row, .. }
            | Self::Malformed { row, .. }
            | Self::Persist { row, .. } => *row,
        }
    }
}
