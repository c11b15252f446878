use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{is_known_event, EVENTS_TOPIC, KNOWN_EVENTS};
use crate::error::{LedgerError, Result};
use crate::queue::TaskQueue;

/// Queue message for one domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: String,
    pub event_type: String,
    pub owner: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

pub struct EventPublisher<'a> {
    queue: &'a dyn TaskQueue,
}

impl<'a> EventPublisher<'a> {
    pub fn new(queue: &'a dyn TaskQueue) -> Self {
        Self { queue }
    }

    /// Queue an event for fan-out to subscribed webhooks. Returns the
    /// generated event id.
    pub fn publish(&self, event_type: &str, owner: &str, payload: Value) -> Result<String> {
        if !is_known_event(event_type) {
            return Err(LedgerError::Config(vec![format!(
                "event_type: unknown event '{event_type}' (known: {})",
                KNOWN_EVENTS.join(", ")
            )]));
        }
        let message = EventMessage {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            owner: owner.to_string(),
            payload,
            occurred_at: Utc::now(),
        };
        self.queue
            .publish(EVENTS_TOPIC, &serde_json::to_value(&message)?, event_type, Duration::zero())?;
        tracing::info!(event = %message.event_id, event_type, owner, "event published");
        Ok(message.event_id)
    }
}
