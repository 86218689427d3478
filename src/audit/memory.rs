//! In-process audit store

use super::{AuditMetrics, AuditRecord, AuditStatus, AuditStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

/// Audit store kept in memory, for hosts without a database and for tests
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    rows: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    fn update<F>(&self, id: i64, from: AuditStatus, apply: F) -> bool
    where
        F: FnOnce(&mut AuditRecord),
    {
        let mut rows = self.rows.lock();
        match rows.iter_mut().find(|r| r.id == id && r.status == from) {
            Some(row) => {
                apply(row);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, chat_id: i64, payload: &str, dedup_key: Option<&str>) -> Result<i64> {
        let mut rows = self.rows.lock();
        let id = rows.last().map(|r| r.id + 1).unwrap_or(1);
        rows.push(AuditRecord {
            id,
            dedup_key: dedup_key.map(str::to_string),
            chat_id,
            telegram_msg_id: None,
            payload: payload.to_string(),
            status: AuditStatus::Queued,
            attempts: 0,
            error_code: None,
            error_message: None,
            flood_wait_seconds: None,
            queued_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            acked_at: None,
        });
        Ok(id)
    }

    async fn mark_sent(&self, id: i64, telegram_msg_id: Option<i64>, attempts: u32) -> Result<bool> {
        Ok(self.update(id, AuditStatus::Queued, |row| {
            row.status = AuditStatus::Sent;
            row.telegram_msg_id = telegram_msg_id;
            row.attempts = attempts;
            row.sent_at = Some(Utc::now());
            row.error_code = None;
            row.error_message = None;
        }))
    }

    async fn mark_failed(
        &self,
        id: i64,
        error_code: Option<&str>,
        error_message: Option<&str>,
        attempts: u32,
    ) -> Result<bool> {
        Ok(self.update(id, AuditStatus::Queued, |row| {
            row.status = AuditStatus::Failed;
            row.attempts = attempts;
            row.failed_at = Some(Utc::now());
            row.error_code = error_code.map(str::to_string);
            row.error_message = error_message.map(str::to_string);
        }))
    }

    async fn record_flood_wait(&self, id: i64, seconds: u64) -> Result<()> {
        if let Some(row) = self.rows.lock().iter_mut().find(|r| r.id == id) {
            row.flood_wait_seconds = Some(seconds);
        }
        Ok(())
    }

    async fn mark_acked(&self, telegram_msg_id: i64) -> Result<bool> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .rev()
            .find(|r| r.status == AuditStatus::Sent && r.telegram_msg_id == Some(telegram_msg_id));
        Ok(match row {
            Some(row) => {
                row.status = AuditStatus::Acked;
                row.acked_at = Some(Utc::now());
                true
            }
            None => false,
        })
    }

    async fn metrics(&self, window_hours: u32) -> Result<AuditMetrics> {
        let since = Utc::now() - Duration::hours(i64::from(window_hours));
        let rows = self.rows.lock();
        let (mut queued, mut sent, mut failed, mut acked) = (0, 0, 0, 0);
        for row in rows.iter().filter(|r| r.queued_at >= since) {
            queued += 1;
            match row.status {
                AuditStatus::Sent => sent += 1,
                AuditStatus::Acked => {
                    sent += 1;
                    acked += 1;
                }
                AuditStatus::Failed => failed += 1,
                AuditStatus::Queued => {}
            }
        }
        Ok(AuditMetrics::from_counts(window_hours, queued, sent, failed, acked))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        Ok(self.rows.lock().iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>> {
        Ok(self.rows.lock().iter().find(|r| r.id == id).cloned())
    }
}
