//! SQLite persistence for the audit trail and custom pattern rules

use crate::audit::{AuditMetrics, AuditRecord, AuditStatus, AuditStore};
use crate::error::{BotError, Result};
use crate::parser::{PatternRule, RuleStore};
use crate::types::BetSide;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const AUDIT_COLUMNS: &str = "id, dedup_key, chat_id, telegram_msg_id, payload, status, attempts, \
     error_code, error_message, flood_wait_seconds, queued_at, sent_at, failed_at, acked_at";

const RULE_COLUMNS: &str = "id, name, description, pattern, market_type, bet_side, live_only, enabled";

/// Database handle, safe to share between the listener and sender threads
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and apply the schema
    pub async fn connect(path: &str) -> Result<Self> {
        let path = shellexpand::tilde(path).into_owned();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!("Database ready at {}", path);
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telegram_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dedup_key TEXT,
                chat_id INTEGER NOT NULL,
                telegram_msg_id INTEGER,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED'
                    CHECK (status IN ('QUEUED', 'SENT', 'FAILED', 'ACKED')),
                attempts INTEGER NOT NULL DEFAULT 0,
                error_code TEXT,
                error_message TEXT,
                flood_wait_seconds INTEGER,
                queued_at TEXT NOT NULL,
                sent_at TEXT,
                failed_at TEXT,
                acked_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_status ON telegram_audit(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_msg ON telegram_audit(telegram_msg_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_queued ON telegram_audit(queued_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                pattern TEXT NOT NULL,
                market_type TEXT NOT NULL,
                bet_side TEXT NOT NULL DEFAULT 'BACK' CHECK (bet_side IN ('BACK', 'LAY')),
                live_only INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Schema applied");
        Ok(())
    }

    // Pattern rules

    /// Insert a new rule, or update the rule with the same id
    pub async fn save_rule(&self, rule: &PatternRule) -> Result<i64> {
        let side = match rule.bet_side {
            BetSide::Back => "BACK",
            BetSide::Lay => "LAY",
            BetSide::Mixed => {
                return Err(BotError::InvalidRule(format!(
                    "rule '{}': side must be BACK or LAY",
                    rule.name
                )))
            }
        };

        if let Some(id) = rule.id {
            sqlx::query(
                r#"
                UPDATE signal_patterns
                SET name = ?, description = ?, pattern = ?, market_type = ?,
                    bet_side = ?, live_only = ?, enabled = ?
                WHERE id = ?
                "#,
            )
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(&rule.pattern)
            .bind(&rule.market_type)
            .bind(side)
            .bind(rule.live_only)
            .bind(rule.enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
            return Ok(id);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO signal_patterns
                (name, description, pattern, market_type, bet_side, live_only, enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.pattern)
        .bind(&rule.market_type)
        .bind(side)
        .bind(rule.live_only)
        .bind(rule.enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE signal_patterns SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM signal_patterns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rules in stored order
    pub async fn list_rules(&self, enabled_only: bool) -> Result<Vec<PatternRule>> {
        let sql = if enabled_only {
            format!("SELECT {RULE_COLUMNS} FROM signal_patterns WHERE enabled = 1 ORDER BY id")
        } else {
            format!("SELECT {RULE_COLUMNS} FROM signal_patterns ORDER BY id")
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(rule_from_row).collect()
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<PatternRule> {
    let side: String = row.try_get("bet_side")?;
    Ok(PatternRule {
        id: Some(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        pattern: row.try_get("pattern")?,
        market_type: row.try_get("market_type")?,
        bet_side: side.parse().unwrap_or(BetSide::Back),
        live_only: row.try_get("live_only")?,
        enabled: row.try_get("enabled")?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditRecord> {
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;
    let flood_wait: Option<i64> = row.try_get("flood_wait_seconds")?;
    Ok(AuditRecord {
        id: row.try_get("id")?,
        dedup_key: row.try_get("dedup_key")?,
        chat_id: row.try_get("chat_id")?,
        telegram_msg_id: row.try_get("telegram_msg_id")?,
        payload: row.try_get("payload")?,
        status: status.parse::<AuditStatus>().map_err(BotError::Runtime)?,
        attempts: u32::try_from(attempts).unwrap_or_default(),
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        flood_wait_seconds: flood_wait.and_then(|s| u64::try_from(s).ok()),
        queued_at: row.try_get::<DateTime<Utc>, _>("queued_at")?,
        sent_at: row.try_get("sent_at")?,
        failed_at: row.try_get("failed_at")?,
        acked_at: row.try_get("acked_at")?,
    })
}

#[async_trait]
impl AuditStore for Database {
    async fn insert(&self, chat_id: i64, payload: &str, dedup_key: Option<&str>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO telegram_audit (dedup_key, chat_id, payload, status, attempts, queued_at)
            VALUES (?, ?, ?, 'QUEUED', 0, ?)
            "#,
        )
        .bind(dedup_key)
        .bind(chat_id)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn mark_sent(&self, id: i64, telegram_msg_id: Option<i64>, attempts: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE telegram_audit
            SET status = 'SENT', telegram_msg_id = ?, attempts = ?, sent_at = ?,
                error_code = NULL, error_message = NULL
            WHERE id = ? AND status = 'QUEUED'
            "#,
        )
        .bind(telegram_msg_id)
        .bind(i64::from(attempts))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: i64,
        error_code: Option<&str>,
        error_message: Option<&str>,
        attempts: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE telegram_audit
            SET status = 'FAILED', error_code = ?, error_message = ?, attempts = ?, failed_at = ?
            WHERE id = ? AND status = 'QUEUED'
            "#,
        )
        .bind(error_code)
        .bind(error_message)
        .bind(i64::from(attempts))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_flood_wait(&self, id: i64, seconds: u64) -> Result<()> {
        sqlx::query("UPDATE telegram_audit SET flood_wait_seconds = ? WHERE id = ?")
            .bind(i64::try_from(seconds).unwrap_or(i64::MAX))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_acked(&self, telegram_msg_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE telegram_audit SET status = 'ACKED', acked_at = ?
            WHERE id = (
                SELECT id FROM telegram_audit
                WHERE telegram_msg_id = ? AND status = 'SENT'
                ORDER BY id DESC LIMIT 1
            )
            "#,
        )
        .bind(Utc::now())
        .bind(telegram_msg_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn metrics(&self, window_hours: u32) -> Result<AuditMetrics> {
        let since = Utc::now() - Duration::hours(i64::from(window_hours));
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS queued,
                COALESCE(SUM(CASE WHEN status IN ('SENT', 'ACKED') THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 'ACKED' THEN 1 ELSE 0 END), 0) AS acked
            FROM telegram_audit
            WHERE queued_at >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let count = |name: &str| -> Result<u64> {
            let value: i64 = row.try_get(name)?;
            Ok(u64::try_from(value).unwrap_or_default())
        };
        Ok(AuditMetrics::from_counts(
            window_hours,
            count("queued")?,
            count("sent")?,
            count("failed")?,
            count("acked")?,
        ))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM telegram_audit ORDER BY id DESC LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>> {
        let row = sqlx::query(&format!("SELECT {AUDIT_COLUMNS} FROM telegram_audit WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(audit_from_row).transpose()
    }
}

#[async_trait]
impl RuleStore for Database {
    async fn enabled_rules(&self) -> Result<Vec<PatternRule>> {
        self.list_rules(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.db");
        let db = Database::connect(path.to_str().unwrap()).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_audit_lifecycle() {
        let (_dir, db) = open().await;
        let id = db.insert(-1001, "COPY CASHOUT\nEvento: A v B", Some("k1")).await.unwrap();

        assert!(db.mark_sent(id, Some(77), 2).await.unwrap());
        let row = db.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Sent);
        assert_eq!(row.attempts, 2);
        assert_eq!(row.telegram_msg_id, Some(77));
        assert!(row.sent_at.is_some());
        assert!(row.error_code.is_none());

        assert!(!db.mark_acked(78).await.unwrap());
        assert!(db.mark_acked(77).await.unwrap());
        assert!(!db.mark_acked(77).await.unwrap());
        assert_eq!(db.get(id).await.unwrap().unwrap().status, AuditStatus::Acked);

        // Terminal rows refuse further transitions
        assert!(!db.mark_failed(id, Some("X"), None, 9).await.unwrap());
    }

    #[tokio::test]
    async fn test_mixed_side_rule_rejected() {
        let (_dir, db) = open().await;
        let mut rule = PatternRule::new("mixed", r"foo (\w+)", "MATCH_ODDS");
        rule.bet_side = BetSide::Mixed;
        assert!(matches!(db.save_rule(&rule).await, Err(BotError::InvalidRule(_))));
        assert!(db.list_rules(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_and_flood_wait() {
        let (_dir, db) = open().await;
        let id = db.insert(5, "hello", None).await.unwrap();
        db.record_flood_wait(id, 30).await.unwrap();
        assert!(db.mark_failed(id, Some("TIMEOUT"), Some("timed out"), 3).await.unwrap());
        assert!(!db.mark_sent(id, Some(1), 4).await.unwrap());

        let row = db.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Failed);
        assert_eq!(row.attempts, 3);
        assert_eq!(row.flood_wait_seconds, Some(30));
        assert_eq!(row.error_message.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn test_metrics_and_recent() {
        let (_dir, db) = open().await;
        for i in 0..4 {
            db.insert(1, &format!("m{i}"), None).await.unwrap();
        }
        db.mark_sent(1, Some(100), 1).await.unwrap();
        db.mark_sent(2, Some(101), 1).await.unwrap();
        db.mark_acked(101).await.unwrap();
        db.mark_failed(3, Some("TIMEOUT"), None, 3).await.unwrap();

        let metrics = db.metrics(24).await.unwrap();
        assert_eq!((metrics.queued, metrics.sent, metrics.failed, metrics.acked), (4, 2, 1, 1));
        assert!((metrics.failure_rate - 0.25).abs() < 1e-9);

        let recent = db.recent(3).await.unwrap();
        assert_eq!(recent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 3, 2]);
        assert!(db.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let (_dir, db) = open().await;
        let mut corners = PatternRule::new("corners", r"corner\s*over\s*(\d+)", "CORNERS_OVER");
        corners.bet_side = BetSide::Lay;
        let first = db.save_rule(&corners).await.unwrap();
        let second = db.save_rule(&PatternRule::new("cards", r"cartellini", "CARDS")).await.unwrap();

        let all = db.list_rules(false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, Some(first));
        assert_eq!(all[0].bet_side, BetSide::Lay);

        assert!(db.set_rule_enabled(first, false).await.unwrap());
        let enabled = db.enabled_rules().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "cards");

        let mut updated = enabled[0].clone();
        updated.description = Some("yellow cards".to_string());
        assert_eq!(db.save_rule(&updated).await.unwrap(), second);
        assert_eq!(db.list_rules(true).await.unwrap()[0].description.as_deref(), Some("yellow cards"));

        assert!(db.delete_rule(second).await.unwrap());
        assert!(!db.delete_rule(second).await.unwrap());
        assert!(db.enabled_rules().await.unwrap().is_empty());
    }
}
