pub mod config;
pub mod events;
pub mod import;
pub mod imports;
pub mod init;
pub mod rules;
pub mod transactions;
pub mod webhooks;
pub mod worker;

use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use rusqlite::Connection;

use crate::db::get_connection;
use crate::error::{LedgerError, Result};
use crate::models::{DeliveryStatus, ImportStatus};
use crate::settings::{load_settings, shellexpand_path, Settings};

#[derive(Parser)]
#[command(name = "ledgerline", version, about = "Statement imports and webhook delivery for a personal ledger.")]
pub struct Cli {
    /// Use this data directory instead of the configured one
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and initialize the database.
    Init,
    /// Import a CSV, spreadsheet or PDF statement.
    Import {
        /// Path to the statement file
        file: String,
        /// Owner of the imported transactions
        #[arg(long)]
        user: String,
        /// Declared file type: csv, xlsx, xls, ods, pdf (default: from extension)
        #[arg(long = "type")]
        file_type: Option<String>,
        /// Parse dates with exactly this strftime format
        #[arg(long = "date-format")]
        date_format: Option<String>,
    },
    /// Inspect and cancel import jobs.
    Imports {
        #[command(subcommand)]
        command: ImportsCommands,
    },
    /// Browse imported transactions.
    Transactions {
        #[command(subcommand)]
        command: TransactionsCommands,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Manage webhook subscriptions.
    Webhooks {
        #[command(subcommand)]
        command: WebhooksCommands,
    },
    /// Publish domain events.
    Events {
        #[command(subcommand)]
        command: EventsCommands,
    },
    /// Process queued webhook work.
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ImportsCommands {
    /// List import jobs, newest first.
    List {
        #[arg(long)]
        user: Option<String>,
    },
    /// Show one import job with its error log.
    Show { id: i64 },
    /// Cancel a pending or running import.
    Cancel { id: i64 },
}

#[derive(Subcommand)]
pub enum TransactionsCommands {
    /// List a user's transactions.
    List {
        #[arg(long)]
        user: String,
        /// Only transactions from this import
        #[arg(long)]
        import: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Pattern to match against transaction descriptions
        pattern: String,
        /// Category name to assign
        #[arg(long)]
        category: String,
        /// Match type: contains, starts_with, regex
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        /// Higher priority rules are tried first
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// List active rules.
    List,
}

#[derive(Subcommand)]
pub enum WebhooksCommands {
    /// Register a webhook.
    Add {
        /// Target URL (http or https)
        url: String,
        #[arg(long)]
        user: String,
        /// Event type to subscribe to (repeatable)
        #[arg(long = "event", required = true)]
        events: Vec<String>,
        /// Shared secret for X-Webhook-Signature
        #[arg(long)]
        secret: Option<String>,
        /// Attempt ceiling, 1-10 (default from settings)
        #[arg(long)]
        retries: Option<i64>,
        /// Request timeout in seconds, 1-300 (default from settings)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List webhooks.
    List {
        #[arg(long)]
        user: Option<String>,
    },
    /// Resume deliveries to a webhook.
    Enable { id: i64 },
    /// Pause deliveries to a webhook.
    Disable { id: i64 },
    /// Delete a webhook and its delivery history.
    Remove { id: i64 },
    /// Show delivery attempts.
    Deliveries {
        #[arg(long)]
        webhook: Option<i64>,
        /// pending, sent, failed or retrying
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Queue an event for subscribed webhooks.
    Publish {
        event_type: String,
        #[arg(long)]
        user: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// Handle every queued task that is due now.
    Run,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings.
    Show,
    /// Update settings: key=value ...
    Set {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}

/// Settings with the `--data-dir` override applied.
pub(crate) fn resolve_settings(data_dir: Option<&str>) -> Settings {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(dir);
    }
    settings
}

pub(crate) fn open_ledger(settings: &Settings) -> Result<Connection> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(LedgerError::Settings(format!(
            "No database found at {}\nRun `ledgerline init` first.",
            db_path.display()
        )));
    }
    get_connection(&db_path)
}

pub(crate) fn import_status_label(status: ImportStatus) -> ColoredString {
    match status {
        ImportStatus::Completed => status.as_str().green(),
        ImportStatus::Failed => status.as_str().red(),
        ImportStatus::Cancelled => status.as_str().yellow(),
        ImportStatus::Pending | ImportStatus::Processing => status.as_str().cyan(),
    }
}

pub(crate) fn delivery_status_label(status: DeliveryStatus) -> ColoredString {
    match status {
        DeliveryStatus::Sent => status.as_str().green(),
        DeliveryStatus::Failed => status.as_str().red(),
        DeliveryStatus::Retrying => status.as_str().yellow(),
        DeliveryStatus::Pending => status.as_str().cyan(),
    }
}
