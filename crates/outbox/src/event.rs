//! Outbox event rows and their state machine.
//!
//! Transitions: `pending → {sent, failed}`, `failed → {sent, dead}`.
//! `sent` and `dead` are terminal and retained for audit. All transitions are
//! owned by the dispatcher; producers only insert or re-arm rows.

use chrono::{DateTime, Duration, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use fincore_core::{DomainError, OutboxEventId};

/// Default delivery attempt ceiling for new rows.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// Persisted error text is truncated to this many characters so a flapping
/// transport cannot grow rows without bound.
pub const MAX_ERROR_LEN: usize = 4000;

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Failed,
    Sent,
    Dead,
}

impl OutboxStatus {
    /// Stable textual form, also the value persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Dead)
    }
}

impl core::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "failed" => Ok(OutboxStatus::Failed),
            "sent" => Ok(OutboxStatus::Sent),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(DomainError::validation(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// Retry delay after `attempts` failed deliveries.
///
/// Capped exponential backoff at minutes granularity:
/// `min(60, 2^clamp(attempts, 1, 6))` minutes.
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(1, 6) as u32;
    Duration::minutes(i64::min(60, 1i64 << exponent))
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_ERROR_LEN).collect()
    }
}

/// A durable outbox row.
///
/// The payload is opaque JSON; its schema belongs to the producer and the
/// outbox never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    /// Origin kind + id form the logical dedup identity together with
    /// `event_name`. Rows without a full origin pair never collide.
    pub origin: Option<String>,
    pub origin_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Whether this row is eligible for a delivery attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OutboxStatus::Pending | OutboxStatus::Failed)
            && self.attempts < self.max_attempts
            && self.next_attempt_at <= now
    }

    /// Record a successful delivery.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Sent;
        self.attempts += 1;
        self.last_error = None;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed delivery attempt: bump the counter, store the
    /// (truncated) error, schedule the retry, and go `dead` once the ceiling
    /// is reached.
    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.attempts += 1;
        self.status = if self.attempts >= self.max_attempts {
            OutboxStatus::Dead
        } else {
            OutboxStatus::Failed
        };
        self.last_error = Some(truncate_error(error));
        self.next_attempt_at = now + retry_delay(self.attempts);
        self.updated_at = now;
    }
}

/// Input for enqueuing (or re-arming) an outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub event_name: String,
    pub payload: serde_json::Value,
    pub origin: Option<String>,
    pub origin_id: Option<i64>,
    pub max_attempts: i32,
}

impl NewOutboxEvent {
    pub fn new(event_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
            origin: None,
            origin_id: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attach the dedup origin pair.
    pub fn with_origin(mut self, origin: impl Into<String>, origin_id: i64) -> Self {
        self.origin = Some(origin.into());
        self.origin_id = Some(origin_id);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The logical dedup identity, present only when both origin components
    /// are set (mirrors the NULL semantics of the unique index).
    pub fn dedup_key(&self) -> Option<(&str, &str, i64)> {
        match (self.origin.as_deref(), self.origin_id) {
            (Some(origin), Some(origin_id)) => Some((&self.event_name, origin, origin_id)),
            _ => None,
        }
    }
}
