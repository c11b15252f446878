use chrono::Utc;
use comfy_table::{Cell, Table};
use colored::Colorize;

use crate::error::Result;
use crate::importer::jobs::{cancel_import, get_import_job, list_import_jobs};
use crate::models::format_timestamp;
use crate::settings::Settings;

use super::{import_status_label, open_ledger};

pub fn list(settings: &Settings, user: Option<&str>) -> Result<()> {
    let conn = open_ledger(settings)?;
    let jobs = list_import_jobs(&conn, user)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "User", "File", "Type", "Status", "Total", "Processed", "Failed", "Created"]);
    for job in jobs {
        table.add_row(vec![
            Cell::new(job.id),
            Cell::new(job.owner),
            Cell::new(job.filename),
            Cell::new(job.file_type),
            Cell::new(import_status_label(job.status)),
            Cell::new(job.total_records),
            Cell::new(job.processed_records),
            Cell::new(job.failed_records),
            Cell::new(job.created_at.map(format_timestamp).unwrap_or_default()),
        ]);
    }
    println!("Imports\n{table}");
    Ok(())
}

pub fn show(settings: &Settings, id: i64) -> Result<()> {
    let conn = open_ledger(settings)?;
    let job = get_import_job(&conn, id)?;
    let stamp = |t: Option<chrono::DateTime<Utc>>| t.map(format_timestamp).unwrap_or_else(|| "-".to_string());

    println!("Import:     {}", job.id);
    println!("User:       {}", job.owner);
    println!("File:       {} ({})", job.filename, job.file_type);
    println!("Status:     {}", import_status_label(job.status));
    println!("Rows:       {} total, {} processed, {} failed", job.total_records, job.processed_records, job.failed_records);
    println!("Checksum:   {}", job.checksum.as_deref().unwrap_or("-"));
    println!("Created:    {}", stamp(job.created_at));
    println!("Started:    {}", stamp(job.started_at));
    println!("Completed:  {}", stamp(job.completed_at));
    if !job.error_log.is_empty() {
        println!();
        println!("Errors:");
        for line in &job.error_log {
            println!("  {}", line.yellow());
        }
    }
    Ok(())
}

pub fn cancel(settings: &Settings, id: i64) -> Result<()> {
    let conn = open_ledger(settings)?;
    let job = cancel_import(&conn, id, Utc::now())?;
    println!("Import {} {}", job.id, import_status_label(job.status));
    Ok(())
}
