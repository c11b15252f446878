//! Outbound webhooks: events are published to the task queue, matched to
//! subscribed endpoints, POSTed with an optional HMAC signature and retried
//! with capped exponential backoff.

pub mod delivery;
pub mod events;
pub mod matcher;
pub mod retry;
pub mod store;

pub const EVENTS_TOPIC: &str = "webhooks.events";
pub const DELIVER_TOPIC: &str = "webhooks.deliver";
pub const RETRY_TOPIC: &str = "webhooks.retry";

pub const KNOWN_EVENTS: &[&str] = &[
    "transaction.created",
    "transaction.updated",
    "transaction.deleted",
    "account.updated",
    "budget.exceeded",
    "import.completed",
    "import.failed",
];

pub fn is_known_event(event_type: &str) -> bool {
    KNOWN_EVENTS.contains(&event_type)
}
