use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::{LedgerError, Result};
use crate::fmt::clip;
use crate::models::{format_timestamp, DeliveryStatus};
use crate::settings::Settings;
use crate::webhooks::store::{create_webhook, delete_webhook, list_deliveries, list_webhooks, set_active, NewWebhook};

use super::{delivery_status_label, open_ledger};

pub struct AddArgs<'a> {
    pub url: &'a str,
    pub user: &'a str,
    pub events: &'a [String],
    pub secret: Option<&'a str>,
    pub retries: Option<i64>,
    pub timeout: Option<u64>,
}

pub fn add(settings: &Settings, args: AddArgs<'_>) -> Result<()> {
    let conn = open_ledger(settings)?;
    let hook = create_webhook(
        &conn,
        &NewWebhook {
            owner: args.user.to_string(),
            url: args.url.to_string(),
            events: args.events.to_vec(),
            secret: args.secret.map(str::to_string),
            retry_count: args.retries.unwrap_or(settings.webhook_retry_count),
            timeout_secs: args.timeout.unwrap_or(settings.webhook_timeout_secs),
        },
    )?;
    println!(
        "Added webhook {} \u{2192} {} ({})",
        hook.id,
        hook.url,
        hook.events.join(", ")
    );
    Ok(())
}

pub fn list(settings: &Settings, user: Option<&str>) -> Result<()> {
    let conn = open_ledger(settings)?;
    let hooks = list_webhooks(&conn, user)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "User", "URL", "Events", "Active", "Signed", "Retries", "Timeout", "Failures", "Last Triggered"]);
    for hook in hooks {
        table.add_row(vec![
            Cell::new(hook.id),
            Cell::new(hook.owner),
            Cell::new(hook.url),
            Cell::new(hook.events.join("\n")),
            Cell::new(if hook.is_active { "yes".green() } else { "no".red() }),
            Cell::new(if hook.secret.is_some() { "yes" } else { "no" }),
            Cell::new(hook.retry_count),
            Cell::new(format!("{}s", hook.timeout_secs)),
            Cell::new(hook.failure_count),
            Cell::new(hook.last_triggered.map(format_timestamp).unwrap_or_default()),
        ]);
    }
    println!("Webhooks\n{table}");
    Ok(())
}

pub fn set_enabled(settings: &Settings, id: i64, enabled: bool) -> Result<()> {
    let conn = open_ledger(settings)?;
    set_active(&conn, id, enabled)?;
    println!("Webhook {id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub fn remove(settings: &Settings, id: i64) -> Result<()> {
    let conn = open_ledger(settings)?;
    delete_webhook(&conn, id)?;
    println!("Removed webhook {id}");
    Ok(())
}

pub fn deliveries(settings: &Settings, webhook: Option<i64>, status: Option<&str>) -> Result<()> {
    let status = status
        .map(|s| {
            DeliveryStatus::parse(s).ok_or_else(|| {
                LedgerError::Config(vec![format!(
                    "status: expected pending, sent, failed or retrying, got '{s}'"
                )])
            })
        })
        .transpose()?;
    let conn = open_ledger(settings)?;
    let rows = list_deliveries(&conn, webhook, status)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Webhook", "Event", "Status", "Attempts", "Code", "Error", "Next Retry", "Delivered"]);
    for d in rows {
        table.add_row(vec![
            Cell::new(d.id),
            Cell::new(d.webhook_id),
            Cell::new(d.event_type),
            Cell::new(delivery_status_label(d.status)),
            Cell::new(d.attempt_count),
            Cell::new(d.response_code.map(|c| c.to_string()).unwrap_or_default()),
            Cell::new(clip(d.error_message.as_deref().unwrap_or(""), 40)),
            Cell::new(d.next_retry.map(format_timestamp).unwrap_or_default()),
            Cell::new(d.delivered_at.map(format_timestamp).unwrap_or_default()),
        ]);
    }
    println!("Deliveries\n{table}");
    Ok(())
}
