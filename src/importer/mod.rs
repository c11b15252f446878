//! Statement import: validate the stored file, parse it into raw rows,
//! normalize each row and materialize it as a ledger transaction. Rows fail
//! independently; only structural problems fail the whole job.

pub mod formats;
pub mod jobs;
pub mod materializer;
pub mod normalizer;
pub mod progress;
pub mod validator;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, Result, RowError};
use crate::models::{ImportJob, ImportStatus};
use crate::settings::Settings;
use crate::storage::Storage;
use crate::webhooks::events::EventPublisher;
use formats::{FileFormat, ParseOptions, RowStream};
use jobs::{find_duplicate, get_import_job};
use materializer::TransactionMaterializer;
use normalizer::RowNormalizer;
use progress::ImportProgressTracker;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Pin one date format instead of trying the configured list in order.
    pub date_format: Option<String>,
    pub parse: ParseOptions,
}

pub struct Importer<'a> {
    conn: &'a Connection,
    storage: &'a dyn Storage,
    settings: &'a Settings,
    publisher: Option<&'a EventPublisher<'a>>,
}

pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

impl<'a> Importer<'a> {
    pub fn new(conn: &'a Connection, storage: &'a dyn Storage, settings: &'a Settings) -> Self {
        Self {
            conn,
            storage,
            settings,
            publisher: None,
        }
    }

    /// Announce `import.completed` / `import.failed` through `publisher`.
    pub fn with_publisher(mut self, publisher: &'a EventPublisher<'a>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    fn open_rows(&self, job: &ImportJob, opts: &ImportOptions) -> Result<RowStream> {
        validator::validate_file(self.storage, &job.filename, self.settings.max_file_size_bytes)?;
        let format = FileFormat::from_declared(&job.file_type)?;
        let data = self.storage.read(&job.filename)?;

        let checksum = compute_checksum(&data);
        self.conn.execute(
            "UPDATE imports SET checksum = ?1 WHERE id = ?2",
            rusqlite::params![checksum, job.id],
        )?;
        if let Some(earlier) = find_duplicate(self.conn, &job.owner, &checksum, job.id)? {
            tracing::warn!(import = job.id, earlier, "file was already imported; importing again");
        }

        format.parse(data, &opts.parse)
    }

    /// Run a pending job to a terminal status. Returns the final job record;
    /// `Err` only for storage-layer failures the job could not absorb.
    pub fn run(&self, job_id: i64, opts: &ImportOptions, now: DateTime<Utc>) -> Result<ImportJob> {
        let job = get_import_job(self.conn, job_id)?;
        let mut tracker = ImportProgressTracker::new(job.id, self.settings.error_log_limit);
        tracker.start(self.conn, now)?;
        tracing::info!(import = job.id, owner = %job.owner, file = %job.filename, "import started");

        let rows = match self.open_rows(&job, opts) {
            Ok(rows) => rows,
            Err(e) if e.is_structural() => {
                tracing::warn!(import = job.id, error = %e, "import failed");
                tracker.record_message(e.to_string());
                let status = tracker.finish(self.conn, ImportStatus::Failed, now)?;
                return self.conclude(job.id, status);
            }
            Err(e) => return self.abort(job.id, &mut tracker, e, now),
        };

        let cancelled = match self.process_rows(&job, rows, opts, &mut tracker) {
            Ok(cancelled) => cancelled,
            Err(e) => return self.abort(job.id, &mut tracker, e, now),
        };

        let target = if cancelled {
            ImportStatus::Cancelled
        } else {
            ImportStatus::Completed
        };
        let status = tracker.finish(self.conn, target, now)?;
        self.conclude(job.id, status)
    }

    /// Normalize and materialize every row. Returns `true` when the job was
    /// cancelled part way through.
    fn process_rows(
        &self,
        job: &ImportJob,
        rows: RowStream,
        opts: &ImportOptions,
        tracker: &mut ImportProgressTracker,
    ) -> Result<bool> {
        let normalizer = match &opts.date_format {
            Some(fmt) => RowNormalizer::with_explicit_format(fmt),
            None => RowNormalizer::new(self.settings.date_formats.clone()),
        };
        let materializer =
            TransactionMaterializer::new(self.conn, &job.owner, &self.settings.default_account_name)
                .for_import(job.id);

        for item in rows {
            if tracker.is_cancelled(self.conn)? {
                return Ok(true);
            }
            let outcome = item.and_then(|raw| normalizer.normalize(raw)).and_then(|row| {
                materializer.materialize(&row).map_err(|e| {
                    tracing::debug!(import = job.id, row = row.row_number, raw = ?row.raw.fields, "row not stored");
                    RowError::Persist {
                        row: row.row_number,
                        message: e.to_string(),
                    }
                })
            });
            match outcome {
                Ok(_) => tracker.record_success(),
                Err(err) => tracker.record_row_error(&err),
            }
            tracker.maybe_flush(self.conn)?;
        }
        Ok(false)
    }

    /// Mark the job failed after an error it cannot absorb, then hand the
    /// error back.
    fn abort(
        &self,
        job_id: i64,
        tracker: &mut ImportProgressTracker,
        err: LedgerError,
        now: DateTime<Utc>,
    ) -> Result<ImportJob> {
        tracing::error!(import = job_id, error = %err, "import aborted");
        tracker.record_message(err.to_string());
        match tracker.finish(self.conn, ImportStatus::Failed, now) {
            Ok(status) => {
                if let Err(e) = self.conclude(job_id, status) {
                    tracing::warn!(import = job_id, error = %e, "could not reload aborted import");
                }
            }
            Err(finish_err) => {
                tracing::error!(import = job_id, error = %finish_err, "could not mark import failed");
            }
        }
        Err(err)
    }

    fn conclude(&self, job_id: i64, status: ImportStatus) -> Result<ImportJob> {
        let job = get_import_job(self.conn, job_id)?;
        if let Some(publisher) = self.publisher {
            let event_type = match status {
                ImportStatus::Completed => Some("import.completed"),
                ImportStatus::Failed => Some("import.failed"),
                _ => None,
            };
            if let Some(event_type) = event_type {
                let payload = json!({
                    "import_id": job.id,
                    "filename": job.filename,
                    "file_type": job.file_type,
                    "status": job.status.as_str(),
                    "total_records": job.total_records,
                    "processed_records": job.processed_records,
                    "failed_records": job.failed_records,
                });
                if let Err(e) = publisher.publish(event_type, &job.owner, payload) {
                    tracing::warn!(import = job.id, error = %e, "could not publish import event");
                }
            }
        }
        Ok(job)
    }
}

/// Create a pending job for a stored file and run it. The declared type
/// falls back to the file extension.
#[allow(clippy::too_many_arguments)]
pub fn import_file(
    conn: &Connection,
    storage: &dyn Storage,
    settings: &Settings,
    owner: &str,
    key: &str,
    file_type: Option<&str>,
    opts: &ImportOptions,
    publisher: Option<&EventPublisher<'_>>,
) -> Result<ImportJob> {
    let file_type = match file_type {
        Some(t) => FileFormat::from_declared(t)?.key().to_string(),
        None => FileFormat::from_filename(key)
            .map(|f| f.key().to_string())
            .map_err(|_| LedgerError::UnsupportedFormat(format!("cannot tell the format of {key}")))?,
    };
    let job = jobs::create_import_job(conn, owner, key, &file_type)?;
    let mut importer = Importer::new(conn, storage, settings);
    if let Some(publisher) = publisher {
        importer = importer.with_publisher(publisher);
    }
    importer.run(job.id, opts, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::importer::jobs::create_import_job;
    use crate::importer::materializer::list_transactions;
    use crate::queue::memory::RecordingQueue;
    use crate::storage::memory::MemoryStorage;
    use crate::webhooks::EVENTS_TOPIC;
    use rust_decimal::Decimal;

    fn settings() -> Settings {
        Settings {
            data_dir: "/tmp/ledgerline-test".into(),
            ..Settings::default()
        }
    }

    fn run(conn: &Connection, storage: &MemoryStorage, key: &str, file_type: &str) -> ImportJob {
        let settings = settings();
        let job = create_import_job(conn, "alice", key, file_type).unwrap();
        Importer::new(conn, storage, &settings)
            .run(job.id, &ImportOptions::default(), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_n_rows_k_invalid() {
        let (_dir, conn) = test_db();
        let csv = "\
date,description,amount,category,tags
2024-03-15,Coffee Shop,$4.50,Dining,coffee
03/16/2024,,12.00,,
2024-03-17,Salary,\"2,500.00\",Income,
not-a-date,Bad Date,1.00,,
2024-03-18,Bad Amount,abc,,
2024-03-19,Groceries,-82.13,Food,\"home, weekly\"
";
        let storage = MemoryStorage::default().with_file("march.csv", csv);
        let job = run(&conn, &storage, "march.csv", "csv");

        assert_eq!(job.status, ImportStatus::Completed);
        assert_eq!(job.total_records, 6);
        assert_eq!(job.processed_records, 3);
        assert_eq!(job.failed_records, 3);
        assert_eq!(job.error_log.len(), 3);
        assert!(job.error_log[0].contains("'description'"));
        assert!(job.checksum.is_some());
        assert!(job.processed_records + job.failed_records <= job.total_records);

        let txns = list_transactions(&conn, "alice", Some(job.id)).unwrap();
        assert_eq!(txns.len(), 3);
        assert_eq!(txns[1].amount, Decimal::new(250000, 2));
        assert_eq!(txns[2].tags, vec!["home", "weekly"]);
    }

    #[test]
    fn test_structural_failure_marks_job_failed() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default();
        let job = run(&conn, &storage, "missing.csv", "csv");
        assert_eq!(job.status, ImportStatus::Failed);
        assert_eq!(job.total_records, 0);
        assert_eq!(job.error_log, vec!["File not found: missing.csv"]);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_unsupported_declared_type_fails_job() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default().with_file("a.docx", "hello");
        let job = run(&conn, &storage, "a.docx", "docx");
        assert_eq!(job.status, ImportStatus::Failed);
        assert!(job.error_log[0].contains("Unsupported file format"));
    }

    #[test]
    fn test_oversize_file_is_rejected_before_reading() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default().with_file("big.csv", vec![b'a'; 64]);
        let settings = Settings {
            max_file_size_bytes: 32,
            ..settings()
        };
        let job = create_import_job(&conn, "alice", "big.csv", "csv").unwrap();
        let job = Importer::new(&conn, &storage, &settings)
            .run(job.id, &ImportOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(job.status, ImportStatus::Failed);
        assert!(job.error_log[0].contains("limit is 32"));
    }

    #[test]
    fn test_explicit_date_format_option() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default()
            .with_file("eu.csv", "date,description,amount\n04/03/2024,Bakery,-3.20\n");
        let settings = settings();
        let job = create_import_job(&conn, "alice", "eu.csv", "csv").unwrap();
        let opts = ImportOptions {
            date_format: Some("%d/%m/%Y".into()),
            ..ImportOptions::default()
        };
        Importer::new(&conn, &storage, &settings).run(job.id, &opts, Utc::now()).unwrap();
        let txns = list_transactions(&conn, "alice", None).unwrap();
        assert_eq!(txns[0].transaction_date, chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }

    #[test]
    fn test_rerunning_a_finished_job_is_rejected() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default()
            .with_file("a.csv", "date,description,amount\n2024-01-01,One,1.00\n");
        let job = run(&conn, &storage, "a.csv", "csv");
        let settings = settings();
        let err = Importer::new(&conn, &storage, &settings)
            .run(job.id, &ImportOptions::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(list_transactions(&conn, "alice", None).unwrap().len(), 1);
    }

    #[test]
    fn test_reimport_same_file_still_imports() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default()
            .with_file("a.csv", "date,description,amount\n2024-01-01,One,1.00\n");
        let first = run(&conn, &storage, "a.csv", "csv");
        let second = run(&conn, &storage, "a.csv", "csv");
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(second.processed_records, 1);
    }

    #[test]
    fn test_outcome_events_are_published() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default()
            .with_file("ok.csv", "date,description,amount\n2024-01-01,One,1.00\n");
        let queue = RecordingQueue::default();
        let publisher = EventPublisher::new(&queue);
        let settings = settings();
        let opts = ImportOptions::default();

        let ok = import_file(&conn, &storage, &settings, "alice", "ok.csv", None, &opts, Some(&publisher)).unwrap();
        import_file(&conn, &storage, &settings, "alice", "gone.csv", None, &opts, Some(&publisher)).unwrap();

        let events = queue.on_topic(EVENTS_TOPIC);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].routing_key, "import.completed");
        assert_eq!(events[0].message["payload"]["import_id"], ok.id);
        assert_eq!(events[0].message["payload"]["processed_records"], 1);
        assert_eq!(events[1].routing_key, "import.failed");
        assert_eq!(events[1].message["owner"], "alice");
    }

    #[test]
    fn test_type_inferred_from_extension() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default();
        let settings = settings();
        let err = import_file(&conn, &storage, &settings, "alice", "notes.docx", None, &ImportOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnsupportedFormat(_)));
        assert!(jobs::list_import_jobs(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_job_is_not_run() {
        let (_dir, conn) = test_db();
        let storage = MemoryStorage::default()
            .with_file("a.csv", "date,description,amount\n2024-01-01,One,1.00\n");
        let job = create_import_job(&conn, "alice", "a.csv", "csv").unwrap();
        jobs::cancel_import(&conn, job.id, Utc::now()).unwrap();
        let settings = settings();
        assert!(Importer::new(&conn, &storage, &settings)
            .run(job.id, &ImportOptions::default(), Utc::now())
            .is_err());
        assert!(list_transactions(&conn, "alice", None).unwrap().is_empty());
        assert_eq!(jobs::current_status(&conn, job.id).unwrap(), ImportStatus::Cancelled);
    }

    #[test]
    fn test_database_error_mid_run_leaves_job_failed() {
        let (_dir, conn) = test_db();
        let mut csv = String::from("date,description,amount\n");
        for i in 0..60 {
            csv.push_str(&format!("2024-01-01,Row {i},1.00\n"));
        }
        let storage = MemoryStorage::default().with_file("long.csv", csv);
        conn.execute_batch(
            "CREATE TRIGGER reject_flush BEFORE UPDATE OF processed_records ON imports \
             WHEN NEW.status = 'processing' \
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .unwrap();
        let queue = RecordingQueue::default();
        let publisher = EventPublisher::new(&queue);
        let settings = settings();
        let job = create_import_job(&conn, "alice", "long.csv", "csv").unwrap();

        let err = Importer::new(&conn, &storage, &settings)
            .with_publisher(&publisher)
            .run(job.id, &ImportOptions::default(), Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("disk I/O error"));

        let job = jobs::get_import_job(&conn, job.id).unwrap();
        assert_eq!(job.status, ImportStatus::Failed);
        assert_eq!(job.total_records, progress::FLUSH_EVERY);
        assert_eq!(job.processed_records, progress::FLUSH_EVERY);
        assert!(job.completed_at.is_some());
        assert!(job.error_log.last().unwrap().contains("disk I/O error"));

        let events = queue.on_topic(EVENTS_TOPIC);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].routing_key, "import.failed");
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
