use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rusqlite::{Connection, TransactionBehavior};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use super::store::{get_delivery, get_webhook, record_failure, record_success};
use crate::error::{LedgerError, Result};
use crate::models::{format_timestamp, DeliveryStatus, Webhook, WebhookDelivery};

pub const USER_AGENT: &str = concat!("ledgerline-webhooks/", env!("CARGO_PKG_VERSION"));

/// Serializes a JSON value with object keys in sorted order at every depth.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    out.serialize_entry(k, &Canonical(v))?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Canonical(item))?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Compact JSON with sorted keys; the exact bytes that are sent and signed.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&Canonical(value))?)
}

/// `sha256=<hex HMAC-SHA256(secret, body)>`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| LedgerError::Other(format!("Cannot key HMAC: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

pub fn build_headers(webhook: &Webhook, event_type: &str, body: &[u8], now: DateTime<Utc>) -> Result<Vec<(String, String)>> {
    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("X-Webhook-Event".to_string(), event_type.to_string()),
        ("X-Webhook-ID".to_string(), webhook.id.to_string()),
        ("X-Webhook-Timestamp".to_string(), now.timestamp().to_string()),
    ];
    if let Some(secret) = webhook.secret.as_deref() {
        headers.push(("X-Webhook-Signature".to_string(), sign_payload(secret, body)?));
    }
    Ok(headers)
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("Request error: {0}")]
    Other(String),
}

/// Outbound POST seam.
pub trait HttpClient {
    fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LedgerError::Other(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn map_transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

impl HttpClient for ReqwestClient {
    fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let started = Instant::now();
        let mut request = self.client.post(url).timeout(timeout).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().map_err(map_transport_error)?;
        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body,
            elapsed: started.elapsed(),
        })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Sends pending deliveries and records the outcome.
pub struct DeliveryAttempt<'a> {
    conn: &'a Connection,
    client: &'a dyn HttpClient,
    body_limit: usize,
}

impl<'a> DeliveryAttempt<'a> {
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

    /// POST one delivery. Returns the updated record, or `None` when the
    /// delivery is not `pending` and nothing was sent.
    pub fn attempt(&self, delivery_id: i64, now: DateTime<Utc>) -> Result<Option<WebhookDelivery>> {
        let delivery = get_delivery(self.conn, delivery_id)?;
        if delivery.status != DeliveryStatus::Pending {
            tracing::debug!(delivery = delivery_id, status = %delivery.status, "delivery not pending; skipped");
            return Ok(None);
        }
        let webhook = get_webhook(self.conn, delivery.webhook_id)?;
        if delivery.attempt_count >= webhook.retry_count {
            self.conn.execute(
                "UPDATE webhook_deliveries SET status = 'failed', \
                 error_message = COALESCE(error_message, 'Retry limit reached') \
                 WHERE id = ?1 AND status = 'pending'",
                [delivery_id],
            )?;
            return Ok(Some(get_delivery(self.conn, delivery_id)?));
        }

        let claimed = self.conn.execute(
            "UPDATE webhook_deliveries SET attempt_count = attempt_count + 1 \
             WHERE id = ?1 AND status = 'pending' AND attempt_count = ?2",
            rusqlite::params![delivery_id, delivery.attempt_count],
        )?;
        if claimed == 0 {
            tracing::debug!(delivery = delivery_id, "delivery taken by another worker");
            return Ok(None);
        }
        let attempt = delivery.attempt_count + 1;

        let body = canonical_json(&delivery.payload)?;
        let headers = build_headers(&webhook, &delivery.event_type, body.as_bytes(), now)?;
        let result = self.client.post(
            &webhook.url,
            &headers,
            body.as_bytes(),
            Duration::from_secs(webhook.timeout_secs),
        );

        let (status, code, response_body, error) = match &result {
            Ok(resp) if resp.is_success() => {
                (DeliveryStatus::Sent, Some(resp.status), Some(truncate(&resp.body, self.body_limit)), None)
            }
            Ok(resp) => (
                DeliveryStatus::Failed,
                Some(resp.status),
                Some(truncate(&resp.body, self.body_limit)),
                Some(format!("HTTP {}: {}", resp.status, resp.reason)),
            ),
            Err(e) => (DeliveryStatus::Failed, None, None, Some(e.to_string())),
        };

        let tx = rusqlite::Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE webhook_deliveries SET status = ?1, response_code = ?2, response_body = ?3, \
             error_message = ?4, delivered_at = ?5, next_retry = NULL \
             WHERE id = ?6 AND status = 'pending' AND attempt_count = ?7",
            rusqlite::params![
                status.as_str(),
                code,
                response_body,
                error,
                format_timestamp(now),
                delivery_id,
                attempt,
            ],
        )?;
        if status == DeliveryStatus::Sent {
            record_success(&tx, webhook.id, now)?;
        } else {
            record_failure(&tx, webhook.id)?;
        }
        tx.commit()?;

        match (&result, &error) {
            (Ok(resp), None) => tracing::info!(
                delivery = delivery_id,
                webhook = webhook.id,
                status = resp.status,
                elapsed_ms = resp.elapsed.as_millis() as u64,
                "webhook delivered"
            ),
            (_, Some(message)) => tracing::warn!(
                delivery = delivery_id,
                webhook = webhook.id,
                attempt,
                error = %message,
                "webhook delivery failed"
            ),
            _ => {}
        }
        Ok(Some(get_delivery(self.conn, delivery_id)?))
    }
}
