use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::jobs::{current_status, transition};
use crate::error::{LedgerError, Result, RowError};
use crate::models::{format_timestamp, ImportStatus};

/// Counters are written back every this many rows while an import runs.
pub const FLUSH_EVERY: i64 = 50;

/// Tallies and error log for one running import job.
pub struct ImportProgressTracker {
    job_id: i64,
    total: i64,
    processed: i64,
    failed: i64,
    errors: VecDeque<String>,
    error_limit: usize,
}

impl ImportProgressTracker {
    pub fn new(job_id: i64, error_limit: usize) -> Self {
        Self {
            job_id,
            total: 0,
            processed: 0,
            failed: 0,
            errors: VecDeque::new(),
            error_limit: error_limit.max(1),
        }
    }

    /// pending → processing.
    pub fn start(&self, conn: &Connection, now: DateTime<Utc>) -> Result<()> {
        transition(conn, self.job_id, ImportStatus::Processing, now)
    }

    pub fn record_success(&mut self) {
        self.total += 1;
        self.processed += 1;
    }

    pub fn record_row_error(&mut self, err: &RowError) {
        self.total += 1;
        self.failed += 1;
        tracing::warn!(import = self.job_id, row = err.row(), "{err}");
        self.push_error(err.to_string());
    }

    /// Job-level message that is not tied to a row.
    pub fn record_message(&mut self, message: impl Into<String>) {
        self.push_error(message.into());
    }

    fn push_error(&mut self, message: String) {
        self.errors.push_back(message);
        while self.errors.len() > self.error_limit {
            self.errors.pop_front();
        }
    }

    fn error_log_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.errors)?)
    }

    /// Write running counters while the job is still processing.
    pub fn maybe_flush(&self, conn: &Connection) -> Result<()> {
        let seen = self.total;
        if seen == 0 || seen % FLUSH_EVERY != 0 {
            return Ok(());
        }
        self.flush(conn)
    }

    pub fn flush(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE imports SET total_records = ?1, processed_records = ?2, failed_records = ?3, \
             error_log = ?4 WHERE id = ?5 AND status = 'processing'",
            rusqlite::params![
                self.total,
                self.processed,
                self.failed,
                self.error_log_json()?,
                self.job_id
            ],
        )?;
        Ok(())
    }

    /// Has someone cancelled the job under us?
    pub fn is_cancelled(&self, conn: &Connection) -> Result<bool> {
        Ok(current_status(conn, self.job_id)? == ImportStatus::Cancelled)
    }

    /// Move to a terminal status, write final tallies and the truncated
    /// error log. A job that was cancelled meanwhile keeps `cancelled` but
    /// still gets its counters.
    pub fn finish(&self, conn: &Connection, status: ImportStatus, now: DateTime<Utc>) -> Result<ImportStatus> {
        if !status.is_terminal() {
            return Err(LedgerError::Other(format!("{status} is not a terminal status")));
        }
        let from = current_status(conn, self.job_id)?;
        let final_status = if from == ImportStatus::Cancelled {
            ImportStatus::Cancelled
        } else if from.can_transition_to(status) {
            status
        } else {
            return Err(LedgerError::InvalidTransition {
                id: self.job_id,
                from: from.to_string(),
                to: status.to_string(),
            });
        };

        let changed = conn.execute(
            "UPDATE imports SET status = ?1, total_records = ?2, processed_records = ?3, \
             failed_records = ?4, error_log = ?5, \
             completed_at = COALESCE(completed_at, ?6) \
             WHERE id = ?7 AND status = ?8",
            rusqlite::params![
                final_status.as_str(),
                self.total,
                self.processed,
                self.failed,
                self.error_log_json()?,
                format_timestamp(now),
                self.job_id,
                from.as_str(),
            ],
        )?;
        if changed == 0 {
            // Lost a race with a concurrent cancel; retry against the new status.
            if current_status(conn, self.job_id)? == ImportStatus::Cancelled && from != ImportStatus::Cancelled {
                return self.finish(conn, ImportStatus::Cancelled, now);
            }
            return Err(LedgerError::InvalidTransition {
                id: self.job_id,
                from: from.to_string(),
                to: final_status.to_string(),
            });
        }
        tracing::info!(
            import = self.job_id,
            status = %final_status,
            total = self.total,
            processed = self.processed,
            failed = self.failed,
            "import finished"
        );
        Ok(final_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::importer::jobs::{cancel_import, create_import_job, get_import_job};

    fn missing(row: usize) -> RowError {
        RowError::MissingField { row, field: "amount" }
    }

    #[test]
    fn test_finish_writes_tallies() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        let mut tracker = ImportProgressTracker::new(job.id, 10);
        tracker.start(&conn, Utc::now()).unwrap();
        tracker.record_success();
        tracker.record_success();
        tracker.record_row_error(&missing(4));
        let status = tracker.finish(&conn, ImportStatus::Completed, Utc::now()).unwrap();
        assert_eq!(status, ImportStatus::Completed);

        let job = get_import_job(&conn, job.id).unwrap();
        assert_eq!(job.total_records, 3);
        assert_eq!(job.processed_records, 2);
        assert_eq!(job.failed_records, 1);
        assert_eq!(job.error_log, vec!["Row 4: missing required field 'amount'"]);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_error_log_keeps_most_recent() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        let mut tracker = ImportProgressTracker::new(job.id, 3);
        tracker.start(&conn, Utc::now()).unwrap();
        for row in 2..=7 {
            tracker.record_row_error(&missing(row));
        }
        tracker.finish(&conn, ImportStatus::Completed, Utc::now()).unwrap();

        let job = get_import_job(&conn, job.id).unwrap();
        assert_eq!(job.failed_records, 6);
        assert_eq!(job.error_log.len(), 3);
        assert!(job.error_log[0].starts_with("Row 5:"));
        assert!(job.error_log[2].starts_with("Row 7:"));
    }

    #[test]
    fn test_flush_happens_on_interval() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        let mut tracker = ImportProgressTracker::new(job.id, 10);
        tracker.start(&conn, Utc::now()).unwrap();
        for _ in 0..FLUSH_EVERY - 1 {
            tracker.record_success();
            tracker.maybe_flush(&conn).unwrap();
        }
        assert_eq!(get_import_job(&conn, job.id).unwrap().processed_records, 0);
        tracker.record_success();
        tracker.maybe_flush(&conn).unwrap();
        assert_eq!(get_import_job(&conn, job.id).unwrap().processed_records, FLUSH_EVERY);
    }

    #[test]
    fn test_cancel_wins_over_completion() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        let mut tracker = ImportProgressTracker::new(job.id, 10);
        tracker.start(&conn, Utc::now()).unwrap();
        tracker.record_success();
        cancel_import(&conn, job.id, Utc::now()).unwrap();
        assert!(tracker.is_cancelled(&conn).unwrap());

        let status = tracker.finish(&conn, ImportStatus::Completed, Utc::now()).unwrap();
        assert_eq!(status, ImportStatus::Cancelled);
        let job = get_import_job(&conn, job.id).unwrap();
        assert_eq!(job.status, ImportStatus::Cancelled);
        assert_eq!(job.processed_records, 1);
    }

    #[test]
    fn test_finish_rejects_non_terminal_status() {
        let (_dir, conn) = test_db();
        let job = create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        let tracker = ImportProgressTracker::new(job.id, 10);
        assert!(tracker.finish(&conn, ImportStatus::Processing, Utc::now()).is_err());
    }
}
