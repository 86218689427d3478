//! Delivery audit trail for outbound messages
//!
//! Every broadcast gets a row that moves QUEUED -> SENT -> ACKED or
//! QUEUED -> FAILED. Rows in a terminal state only accept flood-wait
//! observations.

mod memory;

#[cfg(test)]
mod tests;

pub use memory::MemoryAuditStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error code recorded when the broadcast queue rejects an item
pub const QUEUE_FULL: &str = "QUEUE_FULL";
pub const TIMEOUT: &str = "TIMEOUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Queued,
    Sent,
    Failed,
    Acked,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Queued => "QUEUED",
            AuditStatus::Sent => "SENT",
            AuditStatus::Failed => "FAILED",
            AuditStatus::Acked => "ACKED",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(AuditStatus::Queued),
            "SENT" => Ok(AuditStatus::Sent),
            "FAILED" => Ok(AuditStatus::Failed),
            "ACKED" => Ok(AuditStatus::Acked),
            other => Err(format!("unknown audit status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub dedup_key: Option<String>,
    pub chat_id: i64,
    pub telegram_msg_id: Option<i64>,
    pub payload: String,
    pub status: AuditStatus,
    pub attempts: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub flood_wait_seconds: Option<u64>,
    pub queued_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

/// Delivery counters over rows queued within a time window.
/// `sent` includes acknowledged rows; rates are fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetrics {
    pub window_hours: u32,
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub acked: u64,
    pub delivery_rate: f64,
    pub ack_rate: f64,
    pub failure_rate: f64,
}

impl AuditMetrics {
    pub fn from_counts(window_hours: u32, queued: u64, sent: u64, failed: u64, acked: u64) -> Self {
        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        Self {
            window_hours,
            queued,
            sent,
            failed,
            acked,
            delivery_rate: ratio(sent, queued),
            ack_rate: ratio(acked, sent),
            failure_rate: ratio(failed, queued),
        }
    }
}

/// Persistence contract for the audit trail.
///
/// Implementations must accept calls from both connection threads
/// concurrently. State-changing calls return whether a row transitioned.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, chat_id: i64, payload: &str, dedup_key: Option<&str>) -> Result<i64>;

    /// QUEUED -> SENT, clearing error fields
    async fn mark_sent(&self, id: i64, telegram_msg_id: Option<i64>, attempts: u32) -> Result<bool>;

    /// QUEUED -> FAILED
    async fn mark_failed(
        &self,
        id: i64,
        error_code: Option<&str>,
        error_message: Option<&str>,
        attempts: u32,
    ) -> Result<bool>;

    async fn record_flood_wait(&self, id: i64, seconds: u64) -> Result<()>;

    /// SENT -> ACKED for the row carrying `telegram_msg_id`. False when no
    /// such SENT row exists (duplicate, premature or unknown ack).
    async fn mark_acked(&self, telegram_msg_id: i64) -> Result<bool>;

    async fn metrics(&self, window_hours: u32) -> Result<AuditMetrics>;

    /// Newest first
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>>;

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>>;
}

/// Cut a payload to at most `max_chars` characters for storage
pub fn truncate_payload(payload: &str, max_chars: usize) -> &str {
    match payload.char_indices().nth(max_chars) {
        Some((end, _)) => &payload[..end],
        None => payload,
    }
}
