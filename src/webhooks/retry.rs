use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::store::{get_delivery, get_webhook};
use super::RETRY_TOPIC;
use crate::error::Result;
use crate::models::{format_timestamp, DeliveryStatus};
use crate::queue::TaskQueue;

pub const MAX_BACKOFF_MINUTES: i64 = 60;

/// Minutes to wait after the `attempt_count`-th failed attempt:
/// 1, 2, 4, 8, 16, 32, then 60 for every later attempt.
pub fn backoff_minutes(attempt_count: i64) -> i64 {
    if attempt_count <= 1 {
        return 1;
    }
    let exponent = (attempt_count - 1).min(6) as u32;
    2i64.pow(exponent).min(MAX_BACKOFF_MINUTES)
}

/// Payload of a `webhooks.retry` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryMessage {
    pub delivery_id: i64,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Marked `retrying`; a retry task is queued for `next_retry`.
    Scheduled { next_retry: DateTime<Utc> },
    /// Out of attempts; the delivery stays `failed`.
    Exhausted,
    /// Claimed back to `pending` and ready to be attempted.
    Ready,
    NotReady,
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled { next_retry } => write!(f, "retry scheduled for {}", format_timestamp(*next_retry)),
            Self::Exhausted => f.write_str("retries exhausted"),
            Self::Ready => f.write_str("ready for retry"),
            Self::NotReady => f.write_str("not ready for retry"),
        }
    }
}

pub struct RetryScheduler<'a> {
    conn: &'a Connection,
    queue: &'a dyn TaskQueue,
}

impl<'a> RetryScheduler<'a> {
    pub fn new(conn: &'a Connection, queue: &'a dyn TaskQueue) -> Self {
        Self { conn, queue }
    }

    /// After a failed attempt, either schedule the next one or leave the
    /// delivery terminally failed.
    pub fn schedule(&self, delivery_id: i64, now: DateTime<Utc>) -> Result<RetryOutcome> {
        let delivery = get_delivery(self.conn, delivery_id)?;
        if delivery.status != DeliveryStatus::Failed {
            return Ok(RetryOutcome::NotReady);
        }
        let webhook = get_webhook(self.conn, delivery.webhook_id)?;
        if delivery.attempt_count >= webhook.retry_count {
            tracing::warn!(
                delivery = delivery_id,
                attempts = delivery.attempt_count,
                "webhook delivery gave up"
            );
            return Ok(RetryOutcome::Exhausted);
        }

        let delay = Duration::minutes(backoff_minutes(delivery.attempt_count));
        let next_retry = now + delay;
        let message = RetryMessage {
            delivery_id,
            scheduled_for: next_retry,
        };

        // The status change and the retry task commit together; a failed
        // publish leaves the delivery `failed`.
        let tx = rusqlite::Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE webhook_deliveries SET status = 'retrying', next_retry = ?1 \
             WHERE id = ?2 AND status = 'failed' AND attempt_count = ?3",
            rusqlite::params![format_timestamp(next_retry), delivery_id, delivery.attempt_count],
        )?;
        if changed == 0 {
            return Ok(RetryOutcome::NotReady);
        }
        self.queue.publish(
            RETRY_TOPIC,
            &serde_json::to_value(&message)?,
            &delivery.event_type,
            delay,
        )?;
        tx.commit()?;
        tracing::info!(
            delivery = delivery_id,
            attempt = delivery.attempt_count,
            delay_minutes = delay.num_minutes(),
            "webhook retry scheduled"
        );
        Ok(RetryOutcome::Scheduled { next_retry })
    }

    /// Claim a retrying delivery back to `pending` once its time has come.
    /// Sent deliveries, exhausted ones and early calls are `NotReady`.
    pub fn retry(&self, delivery_id: i64, now: DateTime<Utc>) -> Result<RetryOutcome> {
        let changed = self.conn.execute(
            "UPDATE webhook_deliveries SET status = 'pending' \
             WHERE id = ?1 AND status = 'retrying' AND next_retry <= ?2 \
             AND attempt_count < (SELECT w.retry_count FROM webhooks w WHERE w.id = webhook_deliveries.webhook_id)",
            rusqlite::params![delivery_id, format_timestamp(now)],
        )?;
        if changed == 1 {
            return Ok(RetryOutcome::Ready);
        }
        tracing::debug!(delivery = delivery_id, "not ready for retry");
        Ok(RetryOutcome::NotReady)
    }

    /// Re-queue a retry task that fired before its delivery was due.
    pub fn requeue_early(&self, delivery_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let delivery = get_delivery(self.conn, delivery_id)?;
        match (delivery.status, delivery.next_retry) {
            (DeliveryStatus::Retrying, Some(next_retry)) if next_retry > now => {
                let message = RetryMessage {
                    delivery_id,
                    scheduled_for: next_retry,
                };
                self.queue.publish(
                    RETRY_TOPIC,
                    &serde_json::to_value(&message)?,
                    &delivery.event_type,
                    next_retry - now,
                )?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
