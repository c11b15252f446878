use chrono::Utc;

use crate::error::Result;
use crate::queue::SqliteQueue;
use crate::settings::Settings;
use crate::webhooks::delivery::ReqwestClient;
use crate::worker::Worker;

use super::open_ledger;

pub fn run(settings: &Settings) -> Result<()> {
    let conn = open_ledger(settings)?;
    let client = ReqwestClient::new()?;
    let report = Worker::new(&conn, &client)
        .with_body_limit(settings.response_body_limit)
        .run_due(Utc::now())?;

    println!(
        "{} events, {} deliveries queued, {} sent, {} failed ({} retries scheduled), {} requeued, {} dropped",
        report.events,
        report.deliveries_created,
        report.sent,
        report.failed,
        report.retries_scheduled,
        report.requeued,
        report.dropped
    );
    let queue = SqliteQueue::new(&conn);
    if let Some(next) = queue.next_due()? {
        println!("{} tasks waiting, next due {next}", queue.pending_count()?);
    }
    Ok(())
}
