use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;

use super::{is_known_event, KNOWN_EVENTS};
use crate::error::{LedgerError, Result};
use crate::models::{format_timestamp, parse_timestamp, DeliveryStatus, Webhook, WebhookDelivery};

pub const MAX_RETRY_COUNT: i64 = 10;
pub const MAX_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub owner: String,
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub retry_count: i64,
    pub timeout_secs: u64,
}

impl NewWebhook {
    /// Every problem with the registration, not just the first.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.owner.trim().is_empty() {
            problems.push("owner: must not be empty".to_string());
        }
        match reqwest::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
            Ok(url) => problems.push(format!("url: expected an http(s) URL, got scheme '{}'", url.scheme())),
            Err(e) => problems.push(format!("url: {e}")),
        }
        if self.events.is_empty() {
            problems.push("events: at least one event type is required".to_string());
        }
        for event in &self.events {
            if !is_known_event(event) {
                problems.push(format!(
                    "events: unknown event type '{event}' (known: {})",
                    KNOWN_EVENTS.join(", ")
                ));
            }
        }
        if !(1..=MAX_RETRY_COUNT).contains(&self.retry_count) {
            problems.push(format!(
                "retry_count: expected 1..={MAX_RETRY_COUNT}, got {}",
                self.retry_count
            ));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            problems.push(format!(
                "timeout_secs: expected 1..={MAX_TIMEOUT_SECS}, got {}",
                self.timeout_secs
            ));
        }
        if matches!(&self.secret, Some(s) if s.is_empty()) {
            problems.push("secret: must not be empty when given".to_string());
        }
        problems
    }
}

const WEBHOOK_COLUMNS: &str =
    "id, owner, url, events, is_active, secret, retry_count, timeout_secs, failure_count, last_triggered";

fn webhook_from_row(row: &Row<'_>) -> rusqlite::Result<Webhook> {
    let events: String = row.get(3)?;
    Ok(Webhook {
        id: row.get(0)?,
        owner: row.get(1)?,
        url: row.get(2)?,
        events: serde_json::from_str(&events).unwrap_or_default(),
        is_active: row.get(4)?,
        secret: row.get(5)?,
        retry_count: row.get(6)?,
        timeout_secs: row.get::<_, i64>(7)?.max(1) as u64,
        failure_count: row.get(8)?,
        last_triggered: parse_timestamp(row.get(9)?),
    })
}

pub fn create_webhook(conn: &Connection, new: &NewWebhook) -> Result<Webhook> {
    let problems = new.problems();
    if !problems.is_empty() {
        return Err(LedgerError::Config(problems));
    }
    let mut events = new.events.clone();
    events.sort();
    events.dedup();
    conn.execute(
        "INSERT INTO webhooks (owner, url, events, secret, retry_count, timeout_secs) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            new.owner,
            new.url,
            serde_json::to_string(&events)?,
            new.secret,
            new.retry_count,
            new.timeout_secs as i64,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(webhook = id, owner = %new.owner, url = %new.url, "webhook registered");
    get_webhook(conn, id)
}

pub fn get_webhook(conn: &Connection, id: i64) -> Result<Webhook> {
    conn.query_row(
        &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1"),
        [id],
        webhook_from_row,
    )
    .optional()?
    .ok_or(LedgerError::UnknownWebhook(id))
}

pub fn list_webhooks(conn: &Connection, owner: Option<&str>) -> Result<Vec<Webhook>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE (?1 IS NULL OR owner = ?1) ORDER BY id"
    ))?;
    let hooks = stmt
        .query_map([owner], webhook_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hooks)
}

pub fn set_active(conn: &Connection, id: i64, active: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE webhooks SET is_active = ?1 WHERE id = ?2",
        rusqlite::params![active, id],
    )?;
    if changed == 0 {
        return Err(LedgerError::UnknownWebhook(id));
    }
    Ok(())
}

/// Deliveries go with the webhook.
pub fn delete_webhook(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM webhooks WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(LedgerError::UnknownWebhook(id));
    }
    Ok(())
}

pub fn record_success(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE webhooks SET last_triggered = ?1 WHERE id = ?2",
        rusqlite::params![format_timestamp(now), id],
    )?;
    Ok(())
}

pub fn record_failure(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE webhooks SET failure_count = failure_count + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

const DELIVERY_COLUMNS: &str = "id, webhook_id, event_type, payload, status, response_code, response_body, \
     error_message, attempt_count, next_retry, delivered_at";

fn delivery_from_row(row: &Row<'_>) -> rusqlite::Result<WebhookDelivery> {
    let payload: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(WebhookDelivery {
        id: row.get(0)?,
        webhook_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Failed),
        response_code: row.get(5)?,
        response_body: row.get(6)?,
        error_message: row.get(7)?,
        attempt_count: row.get(8)?,
        next_retry: parse_timestamp(row.get(9)?),
        delivered_at: parse_timestamp(row.get(10)?),
    })
}

pub fn create_delivery(conn: &Connection, webhook_id: i64, event_type: &str, payload: &Value) -> Result<WebhookDelivery> {
    conn.execute(
        "INSERT INTO webhook_deliveries (webhook_id, event_type, payload, status) \
         VALUES (?1, ?2, ?3, 'pending')",
        rusqlite::params![webhook_id, event_type, serde_json::to_string(payload)?],
    )?;
    get_delivery(conn, conn.last_insert_rowid())
}

pub fn get_delivery(conn: &Connection, id: i64) -> Result<WebhookDelivery> {
    conn.query_row(
        &format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = ?1"),
        [id],
        delivery_from_row,
    )
    .optional()?
    .ok_or(LedgerError::UnknownDelivery(id))
}

/// Newest first.
pub fn list_deliveries(
    conn: &Connection,
    webhook_id: Option<i64>,
    status: Option<DeliveryStatus>,
) -> Result<Vec<WebhookDelivery>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
         WHERE (?1 IS NULL OR webhook_id = ?1) AND (?2 IS NULL OR status = ?2) \
         ORDER BY id DESC"
    ))?;
    let deliveries = stmt
        .query_map(
            rusqlite::params![webhook_id, status.map(|s| s.as_str())],
            delivery_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deliveries)
}

#[cfg(test)]
pub(crate) fn sample_webhook(owner: &str, url: &str, events: &[&str]) -> NewWebhook {
    NewWebhook {
        owner: owner.to_string(),
        url: url.to_string(),
        events: events.iter().map(|e| e.to_string()).collect(),
        secret: None,
        retry_count: 3,
        timeout_secs: 30,
    }
}
