use crate::error::{LedgerError, Result};
use crate::queue::SqliteQueue;
use crate::settings::Settings;
use crate::webhooks::events::EventPublisher;

use super::open_ledger;

pub fn publish(settings: &Settings, event_type: &str, user: &str, payload: &str) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| LedgerError::Config(vec![format!("payload: not valid JSON: {e}")]))?;
    let conn = open_ledger(settings)?;
    let queue = SqliteQueue::new(&conn);
    let event_id = EventPublisher::new(&queue).publish(event_type, user, payload)?;
    println!("Queued {event_type} event {event_id}");
    Ok(())
}
