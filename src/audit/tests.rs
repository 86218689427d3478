//! Unit tests for the audit trail

#[cfg(test)]
mod tests {
    use super::super::*;

    #[tokio::test]
    async fn test_sent_then_acked() {
        let store = MemoryAuditStore::new();
        let id = store.insert(-100123, "COPY BET ...", Some("bet-1")).await.unwrap();

        let queued = store.get(id).await.unwrap().unwrap();
        assert_eq!(queued.status, AuditStatus::Queued);
        assert_eq!(queued.dedup_key.as_deref(), Some("bet-1"));
        assert_eq!(queued.attempts, 0);

        assert!(store.mark_sent(id, Some(555), 1).await.unwrap());
        let sent = store.get(id).await.unwrap().unwrap();
        assert_eq!(sent.status, AuditStatus::Sent);
        assert!(sent.sent_at.is_some());
        assert!(sent.error_code.is_none() && sent.error_message.is_none());

        assert!(!store.mark_acked(556).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, AuditStatus::Sent);

        assert!(store.mark_acked(555).await.unwrap());
        let acked = store.get(id).await.unwrap().unwrap();
        assert_eq!(acked.status, AuditStatus::Acked);
        assert!(acked.acked_at.is_some());

        // Duplicate ack is a no-op
        assert!(!store.mark_acked(555).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let store = MemoryAuditStore::new();
        let id = store.insert(1, "hello", None).await.unwrap();

        assert!(store.mark_failed(id, Some(TIMEOUT), Some("send timed out"), 3).await.unwrap());
        assert!(!store.mark_sent(id, Some(9), 4).await.unwrap());
        assert!(!store.mark_failed(id, Some("OTHER"), None, 5).await.unwrap());

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Failed);
        assert_eq!(row.attempts, 3);
        assert_eq!(row.error_code.as_deref(), Some(TIMEOUT));
        assert!(row.failed_at.is_some());

        // Flood waits stay observable on terminal rows
        store.record_flood_wait(id, 12).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().flood_wait_seconds, Some(12));
    }

    #[tokio::test]
    async fn test_ack_before_send_is_rejected() {
        let store = MemoryAuditStore::new();
        let id = store.insert(1, "hello", None).await.unwrap();
        assert!(!store.mark_acked(1).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, AuditStatus::Queued);
    }

    #[tokio::test]
    async fn test_metrics_rates() {
        let store = MemoryAuditStore::new();
        for i in 0..4 {
            store.insert(1, &format!("msg {i}"), None).await.unwrap();
        }
        store.mark_sent(1, Some(11), 1).await.unwrap();
        store.mark_sent(2, Some(12), 2).await.unwrap();
        store.mark_acked(11).await.unwrap();
        store.mark_failed(3, Some(TIMEOUT), None, 3).await.unwrap();

        let metrics = store.metrics(24).await.unwrap();
        assert_eq!(metrics.queued, 4);
        assert_eq!(metrics.sent, 2);
        assert_eq!(metrics.acked, 1);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.delivery_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.ack_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.failure_rate - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_metrics_have_zero_rates() {
        let metrics = MemoryAuditStore::new().metrics(1).await.unwrap();
        assert_eq!(metrics, AuditMetrics::from_counts(1, 0, 0, 0, 0));
        assert_eq!(metrics.delivery_rate, 0.0);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let store = MemoryAuditStore::new();
        for i in 0..5 {
            store.insert(1, &format!("msg {i}"), None).await.unwrap();
        }
        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, "msg 4");
        assert_eq!(recent[1].payload, "msg 3");
    }

    #[test]
    fn test_truncate_payload_counts_chars() {
        assert_eq!(truncate_payload("àèìòù", 3), "àèì");
        assert_eq!(truncate_payload("short", 500), "short");
    }
}
