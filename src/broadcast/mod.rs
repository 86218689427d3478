//! Broadcast queue
//!
//! Each live connection owns one bounded FIFO queue and one worker task on
//! its event loop, so sends to a chat never overlap or reorder.

mod outcome;
mod rate_limit;
mod worker;


pub use outcome::{AttemptOutcome, SendFailure};
pub use rate_limit::{AdaptiveDelay, RetryPolicy};
pub use worker::{BroadcastWorker, Delivery};

use crate::audit::{truncate_payload, AuditStore, QUEUE_FULL};
use crate::config::BroadcastConfig;
use crate::error::{BotError, Result};
use crate::transport::{Role, Transport};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
    pub dedup_key: Option<String>,
    pub audit_id: Option<i64>,
}

pub struct Broadcaster {
    role: Role,
    config: BroadcastConfig,
    audit: Arc<dyn AuditStore>,
    intake: Mutex<Option<mpsc::Sender<OutboundMessage>>>,
    pending: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Start the worker on the current runtime
    pub fn spawn(
        role: Role,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditStore>,
        config: BroadcastConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = BroadcastWorker::new(
            role,
            transport,
            Arc::clone(&audit),
            rx,
            Arc::clone(&pending),
            shutdown_rx,
            &config,
        );
        let task = tokio::spawn(worker.run());

        Arc::new(Self {
            role,
            config,
            audit,
            intake: Mutex::new(Some(tx)),
            pending,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Items queued or in flight
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Record an audit row and queue the message. Returns the audit id, or
    /// `None` if the audit store was unavailable (the message is still sent).
    pub async fn submit(&self, chat_id: i64, text: &str, dedup_key: Option<&str>) -> Result<Option<i64>> {
        self.enqueue(chat_id, text, dedup_key, self.config.append_timestamp).await
    }

    /// Queue an acknowledgement. Never stamped: the receiving side matches
    /// the whole text.
    pub async fn submit_ack(&self, chat_id: i64, text: &str) -> Result<Option<i64>> {
        self.enqueue(chat_id, text, None, false).await
    }

    async fn enqueue(&self, chat_id: i64, text: &str, dedup_key: Option<&str>, stamp: bool) -> Result<Option<i64>> {
        let stored = truncate_payload(text, self.config.audit_payload_max);
        let audit_id = match self.audit.insert(chat_id, stored, dedup_key).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Audit insert failed, sending without audit: {}", e);
                None
            }
        };

        let text = if stamp {
            format!("{}\n\n[{}]", text, Utc::now().timestamp())
        } else {
            text.to_string()
        };
        let item = OutboundMessage {
            chat_id,
            text,
            dedup_key: dedup_key.map(str::to_string),
            audit_id,
        };

        let intake = self.intake.lock().clone();
        let Some(intake) = intake else {
            self.reject(audit_id, "QUEUE_CLOSED", "broadcast queue closed").await;
            return Err(BotError::QueueClosed);
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        match intake.try_send(item) {
            Ok(()) => {
                debug!("Queued message for {} on {} connection", chat_id, self.role);
                Ok(audit_id)
            }
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!("Broadcast queue full on {} connection, dropping message", self.role);
                self.reject(audit_id, QUEUE_FULL, "broadcast queue full").await;
                Err(BotError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.reject(audit_id, "QUEUE_CLOSED", "broadcast queue closed").await;
                Err(BotError::QueueClosed)
            }
        }
    }

    async fn reject(&self, audit_id: Option<i64>, code: &str, message: &str) {
        if let Some(id) = audit_id {
            if let Err(e) = self.audit.mark_failed(id, Some(code), Some(message), 0).await {
                warn!("Failed to record rejected message {}: {}", id, e);
            }
        }
    }

    /// Close intake, let the worker drain for up to `drain_timeout`, then
    /// stop it. Returns whether the queue drained in time.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        drop(self.intake.lock().take());
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return true;
        };

        match tokio::time::timeout(drain_timeout, &mut task).await {
            Ok(_) => {
                info!("Broadcast queue on {} connection drained", self.role);
                true
            }
            Err(_) => {
                warn!(
                    "Broadcast queue on {} connection not drained in {:?}, {} items dropped",
                    self.role,
                    drain_timeout,
                    self.pending()
                );
                let _ = self.shutdown.send(true);
                task.abort();
                false
            }
        }
    }
}
