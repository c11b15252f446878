use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{LedgerError, Result};
use crate::models::{format_timestamp, parse_timestamp, ImportJob, ImportStatus};

const JOB_COLUMNS: &str = "id, owner, filename, file_type, status, total_records, processed_records, \
     failed_records, error_log, checksum, created_at, started_at, completed_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ImportJob> {
    let status: String = row.get(4)?;
    let error_log: String = row.get(8)?;
    Ok(ImportJob {
        id: row.get(0)?,
        owner: row.get(1)?,
        filename: row.get(2)?,
        file_type: row.get(3)?,
        status: ImportStatus::parse(&status).unwrap_or(ImportStatus::Failed),
        total_records: row.get(5)?,
        processed_records: row.get(6)?,
        failed_records: row.get(7)?,
        error_log: serde_json::from_str(&error_log).unwrap_or_default(),
        checksum: row.get(9)?,
        created_at: parse_timestamp(row.get(10)?),
        started_at: parse_timestamp(row.get(11)?),
        completed_at: parse_timestamp(row.get(12)?),
    })
}

pub fn create_import_job(
    conn: &Connection,
    owner: &str,
    filename: &str,
    file_type: &str,
) -> Result<ImportJob> {
    conn.execute(
        "INSERT INTO imports (owner, filename, file_type, status) VALUES (?1, ?2, ?3, 'pending')",
        rusqlite::params![owner, filename, file_type],
    )?;
    get_import_job(conn, conn.last_insert_rowid())
}

pub fn get_import_job(conn: &Connection, id: i64) -> Result<ImportJob> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM imports WHERE id = ?1"),
        [id],
        job_from_row,
    )
    .optional()?
    .ok_or(LedgerError::UnknownImport(id))
}

pub fn list_import_jobs(conn: &Connection, owner: Option<&str>) -> Result<Vec<ImportJob>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM imports WHERE (?1 IS NULL OR owner = ?1) ORDER BY id DESC"
    ))?;
    let jobs = stmt
        .query_map([owner], job_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

pub fn current_status(conn: &Connection, id: i64) -> Result<ImportStatus> {
    let status: String = conn
        .query_row("SELECT status FROM imports WHERE id = ?1", [id], |r| r.get(0))
        .optional()?
        .ok_or(LedgerError::UnknownImport(id))?;
    ImportStatus::parse(&status)
        .ok_or_else(|| LedgerError::Other(format!("Import {id} has unknown status '{status}'")))
}

/// Move a job to `to`, conditional on it still being in the status we read.
/// Entering `processing` stamps `started_at`; entering a terminal status
/// stamps `completed_at`.
pub fn transition(conn: &Connection, id: i64, to: ImportStatus, now: DateTime<Utc>) -> Result<()> {
    let from = current_status(conn, id)?;
    if !from.can_transition_to(to) {
        return Err(LedgerError::InvalidTransition {
            id,
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let ts = format_timestamp(now);
    let changed = conn.execute(
        "UPDATE imports SET status = ?1, \
         started_at = CASE WHEN ?1 = 'processing' THEN ?2 ELSE started_at END, \
         completed_at = CASE WHEN ?3 THEN ?2 ELSE completed_at END \
         WHERE id = ?4 AND status = ?5",
        rusqlite::params![to.as_str(), ts, to.is_terminal(), id, from.as_str()],
    )?;
    if changed == 0 {
        let now_status = current_status(conn, id)?;
        return Err(LedgerError::InvalidTransition {
            id,
            from: now_status.to_string(),
            to: to.to_string(),
        });
    }
    tracing::debug!(import = id, from = %from, to = %to, "import status changed");
    Ok(())
}

pub fn cancel_import(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<ImportJob> {
    transition(conn, id, ImportStatus::Cancelled, now)?;
    tracing::info!(import = id, "import cancelled");
    get_import_job(conn, id)
}

/// Earlier import by the same owner with identical file contents.
pub fn find_duplicate(conn: &Connection, owner: &str, checksum: &str, exclude: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM imports WHERE owner = ?1 AND checksum = ?2 AND id != ?3 \
             AND status = 'completed' ORDER BY id LIMIT 1",
            rusqlite::params![owner, checksum, exclude],
            |r| r.get(0),
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_create_job_is_pending() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "march.csv", "csv").unwrap();
        assert_eq!(job.status, ImportStatus::Pending);
        assert_eq!(job.owner, "alice");
        assert!(job.error_log.is_empty());
        assert!(job.created_at.is_some());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_processing_stamps_started_at() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "march.csv", "csv").unwrap();
        transition(&conn, job.id, ImportStatus::Processing, Utc::now()).unwrap();
        let job = get_import_job(&conn, job.id).unwrap();
        assert_eq!(job.status, ImportStatus::Processing);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_status_never_moves_backward() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "march.csv", "csv").unwrap();
        transition(&conn, job.id, ImportStatus::Processing, Utc::now()).unwrap();
        transition(&conn, job.id, ImportStatus::Completed, Utc::now()).unwrap();
        let err = transition(&conn, job.id, ImportStatus::Processing, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(current_status(&conn, job.id).unwrap(), ImportStatus::Completed);
    }

    #[test]
    fn test_cancel_pending_job() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "march.csv", "csv").unwrap();
        let job = cancel_import(&conn, job.id, Utc::now()).unwrap();
        assert_eq!(job.status, ImportStatus::Cancelled);
        assert!(job.completed_at.is_some());
        assert!(cancel_import(&conn, job.id, Utc::now()).is_err());
    }

    #[test]
    fn test_list_filters_by_owner() {
        let (_dir, conn) = test_db();
        create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        create_import_job(&conn, "bob", "b.csv", "csv").unwrap();
        assert_eq!(list_import_jobs(&conn, Some("alice")).unwrap().len(), 1);
        assert_eq!(list_import_jobs(&conn, None).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_job() {
        let (_dir, conn) = test_db();
        assert!(matches!(get_import_job(&conn, 99), Err(LedgerError::UnknownImport(99))));
    }
}
