use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{LedgerError, Result};
use crate::models::{format_timestamp, DeliveryStatus};
use crate::queue::{QueuedTask, SqliteQueue, TaskQueue};
use crate::webhooks::delivery::{DeliveryAttempt, HttpClient};
use crate::webhooks::events::EventMessage;
use crate::webhooks::matcher::find_subscribers;
use crate::webhooks::retry::{RetryMessage, RetryOutcome, RetryScheduler};
use crate::webhooks::store::{create_delivery, get_delivery};
use crate::webhooks::{DELIVER_TOPIC, EVENTS_TOPIC, RETRY_TOPIC};

const BATCH_SIZE: usize = 50;
const MAX_ROUNDS: usize = 100;
/// Pause before a delivery whose task failed part way is tried again.
const RELEASE_DELAY_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct DeliverMessage {
    delivery_id: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub events: usize,
    pub deliveries_created: usize,
    pub sent: usize,
    pub failed: usize,
    pub retries_scheduled: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// Drains due tasks from the `task_queue` table.
pub struct Worker<'a> {
    conn: &'a Connection,
    client: &'a dyn HttpClient,
    body_limit: usize,
}

impl<'a> Worker<'a> {
    pub fn new(conn: &'a Connection, client: &'a dyn HttpClient) -> Self {
        Self {
            conn,
            client,
            body_limit: 1000,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Handle every task due at `now`, including tasks queued while handling
    /// earlier ones. A delivery whose task fails is queued again from the
    /// state it was left in; other failed tasks are logged and dropped.
    pub fn run_due(&self, now: DateTime<Utc>) -> Result<WorkerReport> {
        let queue = SqliteQueue::new(self.conn).as_of(now);
        let mut report = WorkerReport::default();
        for _ in 0..MAX_ROUNDS {
            let tasks = queue.claim_due(now, BATCH_SIZE)?;
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                tracing::debug!(task = task.id, topic = %task.topic, key = %task.routing_key, "handling task");
                let Err(e) = self.handle(&queue, &task, now, &mut report) else {
                    continue;
                };
                match self.release(&queue, &task, now) {
                    Ok(true) => {
                        tracing::warn!(task = task.id, topic = %task.topic, error = %e, "task failed; delivery requeued");
                        report.requeued += 1;
                    }
                    Ok(false) => {
                        tracing::warn!(task = task.id, topic = %task.topic, error = %e, "task dropped");
                        report.dropped += 1;
                    }
                    Err(release_err) => {
                        tracing::error!(
                            task = task.id,
                            topic = %task.topic,
                            error = %e,
                            release_error = %release_err,
                            "task dropped; delivery could not be requeued"
                        );
                        report.dropped += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    fn handle(&self, queue: &dyn TaskQueue, task: &QueuedTask, now: DateTime<Utc>, report: &mut WorkerReport) -> Result<()> {
        match task.topic.as_str() {
            EVENTS_TOPIC => {
                let event: EventMessage = serde_json::from_value(task.payload.clone())?;
                report.events += 1;
                self.fan_out(queue, &event, report)
            }
            DELIVER_TOPIC => {
                let msg: DeliverMessage = serde_json::from_value(task.payload.clone())?;
                self.deliver(queue, msg.delivery_id, now, report)
            }
            RETRY_TOPIC => {
                let msg: RetryMessage = serde_json::from_value(task.payload.clone())?;
                let scheduler = RetryScheduler::new(self.conn, queue);
                match scheduler.retry(msg.delivery_id, now)? {
                    RetryOutcome::Ready => self.deliver(queue, msg.delivery_id, now, report),
                    _ => {
                        scheduler.requeue_early(msg.delivery_id, now)?;
                        Ok(())
                    }
                }
            }
            other => Err(LedgerError::Other(format!("no handler for topic '{other}'"))),
        }
    }

    /// Queue the next step for a delivery whose task failed part way.
    /// Returns `false` when the task names no delivery or there is nothing
    /// left to do for it.
    fn release(&self, queue: &dyn TaskQueue, task: &QueuedTask, now: DateTime<Utc>) -> Result<bool> {
        if task.topic != DELIVER_TOPIC && task.topic != RETRY_TOPIC {
            return Ok(false);
        }
        let Some(delivery_id) = task.payload.get("delivery_id").and_then(Value::as_i64) else {
            return Ok(false);
        };
        let delivery = get_delivery(self.conn, delivery_id)?;
        let pause = Duration::seconds(RELEASE_DELAY_SECS);
        match delivery.status {
            DeliveryStatus::Pending => {
                queue.publish(DELIVER_TOPIC, &json!({ "delivery_id": delivery_id }), &delivery.event_type, pause)?;
                Ok(true)
            }
            DeliveryStatus::Failed => Ok(matches!(
                RetryScheduler::new(self.conn, queue).schedule(delivery_id, now)?,
                RetryOutcome::Scheduled { .. }
            )),
            DeliveryStatus::Retrying => {
                let due = delivery.next_retry.unwrap_or(now);
                let message = RetryMessage {
                    delivery_id,
                    scheduled_for: due,
                };
                queue.publish(
                    RETRY_TOPIC,
                    &serde_json::to_value(&message)?,
                    &delivery.event_type,
                    (due - now).max(pause),
                )?;
                Ok(true)
            }
            DeliveryStatus::Sent => Ok(false),
        }
    }

    /// One delivery row and one deliver task per subscribed webhook.
    fn fan_out(&self, queue: &dyn TaskQueue, event: &EventMessage, report: &mut WorkerReport) -> Result<()> {
        let hooks = find_subscribers(self.conn, &event.event_type, Some(&event.owner))?;
        if hooks.is_empty() {
            tracing::debug!(event = %event.event_id, event_type = %event.event_type, "no subscribers");
        }
        let body = json!({
            "event_id": event.event_id,
            "event": event.event_type,
            "occurred_at": format_timestamp(event.occurred_at),
            "data": event.payload,
        });
        for hook in hooks {
            let delivery = create_delivery(self.conn, hook.id, &event.event_type, &body)?;
            queue.publish(
                DELIVER_TOPIC,
                &json!({ "delivery_id": delivery.id }),
                &event.event_type,
                Duration::zero(),
            )?;
            report.deliveries_created += 1;
        }
        Ok(())
    }

    fn deliver(&self, queue: &dyn TaskQueue, delivery_id: i64, now: DateTime<Utc>, report: &mut WorkerReport) -> Result<()> {
        let attempt = DeliveryAttempt::new(self.conn, self.client).with_body_limit(self.body_limit);
        let Some(delivery) = attempt.attempt(delivery_id, now)? else {
            return Ok(());
        };
        match delivery.status {
            DeliveryStatus::Sent => report.sent += 1,
            DeliveryStatus::Failed => {
                report.failed += 1;
                if let RetryOutcome::Scheduled { .. } = RetryScheduler::new(self.conn, queue).schedule(delivery_id, now)? {
                    report.retries_scheduled += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
