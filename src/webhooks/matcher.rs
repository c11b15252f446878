use rusqlite::Connection;

use super::store::list_webhooks;
use crate::error::Result;
use crate::models::Webhook;

/// Active webhooks subscribed to `event_type`, optionally limited to one
/// owner. Event names must match exactly; there are no wildcards.
pub fn find_subscribers(conn: &Connection, event_type: &str, owner: Option<&str>) -> Result<Vec<Webhook>> {
    let hooks = list_webhooks(conn, owner)?
        .into_iter()
        .filter(|hook| hook.is_active && hook.subscribes_to(event_type))
        .collect();
    Ok(hooks)
}
