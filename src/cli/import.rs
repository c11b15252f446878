use colored::Colorize;

use crate::categorizer::categorize_transactions;
use crate::error::{LedgerError, Result};
use crate::importer::{import_file, ImportOptions};
use crate::models::ImportStatus;
use crate::queue::SqliteQueue;
use crate::settings::Settings;
use crate::storage::LocalStorage;
use crate::webhooks::events::EventPublisher;

use super::{import_status_label, open_ledger};

pub fn run(
    settings: &Settings,
    file: &str,
    user: &str,
    file_type: Option<&str>,
    date_format: Option<&str>,
) -> Result<()> {
    let conn = open_ledger(settings)?;
    let storage = LocalStorage::new(std::env::current_dir()?);
    let opts = ImportOptions {
        date_format: date_format.map(str::to_string),
        ..ImportOptions::default()
    };

    let queue = SqliteQueue::new(&conn);
    let publisher = EventPublisher::new(&queue);
    let job = import_file(&conn, &storage, settings, user, file, file_type, &opts, Some(&publisher))?;

    println!(
        "Import {} {}: {} imported, {} failed, {} rows read",
        job.id,
        import_status_label(job.status),
        job.processed_records,
        job.failed_records,
        job.total_records
    );
    for line in &job.error_log {
        println!("  {}", line.yellow());
    }

    if job.status == ImportStatus::Failed {
        return Err(LedgerError::Other(format!("Import {} failed", job.id)));
    }

    let cat_result = categorize_transactions(&conn, Some(job.id))?;
    println!(
        "{} categorized, {} uncategorized",
        cat_result.categorized, cat_result.uncategorized
    );
    Ok(())
}
