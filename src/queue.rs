use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::Value;

use crate::error::Result;
use crate::models::format_timestamp;

/// Delayed-publish task queue. Services take it as a parameter so tests can
/// substitute an in-memory recorder.
pub trait TaskQueue {
    fn publish(&self, topic: &str, message: &Value, routing_key: &str, delay: Duration) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: i64,
    pub topic: String,
    pub routing_key: String,
    pub payload: Value,
}

/// Queue persisted in the `task_queue` table.
pub struct SqliteQueue<'a> {
    conn: &'a Connection,
    clock: Option<DateTime<Utc>>,
}

impl<'a> SqliteQueue<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn, clock: None }
    }

    /// Measure publish delays from `now` instead of the wall clock.
    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    /// Claim up to `limit` tasks whose delay has elapsed. A task is handed
    /// to exactly one caller: the claim is conditional on `claimed_at` still
    /// being unset.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>> {
        let ts = format_timestamp(now);
        let mut stmt = self.conn.prepare(
            "SELECT id, topic, routing_key, payload FROM task_queue \
             WHERE claimed_at IS NULL AND available_at <= ?1 \
             ORDER BY available_at, id LIMIT ?2",
        )?;
        let candidates: Vec<(i64, String, String, String)> = stmt
            .query_map(rusqlite::params![ts, limit as i64], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for (id, topic, routing_key, payload) in candidates {
            let changed = self.conn.execute(
                "UPDATE task_queue SET claimed_at = ?1 WHERE id = ?2 AND claimed_at IS NULL",
                rusqlite::params![ts, id],
            )?;
            if changed == 0 {
                continue;
            }
            let payload = match serde_json::from_str(&payload) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(task = id, topic = %topic, error = %e, "dropping task with unreadable payload");
                    continue;
                }
            };
            claimed.push(QueuedTask {
                id,
                topic,
                routing_key,
                payload,
            });
        }
        Ok(claimed)
    }

    /// Unclaimed tasks, due or not.
    pub fn pending_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT count(*) FROM task_queue WHERE claimed_at IS NULL", [], |r| r.get(0))?)
    }

    /// Earliest time an unclaimed task becomes due.
    pub fn next_due(&self) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT min(available_at) FROM task_queue WHERE claimed_at IS NULL",
            [],
            |r| r.get(0),
        )?)
    }
}

impl TaskQueue for SqliteQueue<'_> {
    fn publish(&self, topic: &str, message: &Value, routing_key: &str, delay: Duration) -> Result<()> {
        let available_at = self.clock.unwrap_or_else(Utc::now) + delay.max(Duration::zero());
        self.conn.execute(
            "INSERT INTO task_queue (topic, routing_key, payload, available_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                topic,
                routing_key,
                serde_json::to_string(message)?,
                format_timestamp(available_at)
            ],
        )?;
        tracing::debug!(topic, routing_key, delay_secs = delay.num_seconds(), "task queued");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use serde_json::json;

    #[test]
    fn test_claim_only_due_tasks() {
        let (_dir, conn) = test_db();
        let queue = SqliteQueue::new(&conn);
        queue.publish("t", &json!({"n": 1}), "k", Duration::zero()).unwrap();
        queue.publish("t", &json!({"n": 2}), "k", Duration::minutes(5)).unwrap();

        let due = queue.claim_due(Utc::now(), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload["n"], 1);
        assert_eq!(queue.pending_count().unwrap(), 1);

        let later = queue.claim_due(Utc::now() + Duration::minutes(6), 10).unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].payload["n"], 2);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_frozen_clock_sets_availability() {
        let (_dir, conn) = test_db();
        let then = Utc::now() + Duration::days(3);
        let queue = SqliteQueue::new(&conn).as_of(then);
        queue.publish("t", &json!({}), "k", Duration::minutes(1)).unwrap();
        assert!(queue.claim_due(then, 10).unwrap().is_empty());
        assert_eq!(queue.claim_due(then + Duration::minutes(1), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_task_is_claimed_once() {
        let (_dir, conn) = test_db();
        let queue = SqliteQueue::new(&conn);
        queue.publish("t", &json!({}), "k", Duration::zero()).unwrap();
        assert_eq!(queue.claim_due(Utc::now(), 10).unwrap().len(), 1);
        assert!(queue.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_claim_respects_limit_and_order() {
        let (_dir, conn) = test_db();
        let queue = SqliteQueue::new(&conn);
        for n in 0..5 {
            queue.publish("t", &json!({ "n": n }), "k", Duration::zero()).unwrap();
        }
        let first = queue.claim_due(Utc::now(), 2).unwrap();
        assert_eq!(first.iter().map(|t| t.payload["n"].as_i64().unwrap()).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(queue.pending_count().unwrap(), 3);
    }
}
