//! Single-consumer delivery loop

use super::outcome::{settle, AttemptOutcome, SendFailure};
use super::rate_limit::{AdaptiveDelay, RetryPolicy};
use super::OutboundMessage;
use crate::audit::AuditStore;
use crate::config::BroadcastConfig;
use crate::transport::{Role, Transport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Final result of delivering one queued item
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sent { message_id: i64, attempts: u32 },
    Failed { code: String, attempts: u32 },
}

pub struct BroadcastWorker {
    role: Role,
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditStore>,
    rx: mpsc::Receiver<OutboundMessage>,
    pending: Arc<AtomicUsize>,
    shutdown: watch::Receiver<bool>,
    delay: AdaptiveDelay,
    retry: RetryPolicy,
    send_timeout: Duration,
    poll_interval: Duration,
}

impl BroadcastWorker {
    pub fn new(
        role: Role,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditStore>,
        rx: mpsc::Receiver<OutboundMessage>,
        pending: Arc<AtomicUsize>,
        shutdown: watch::Receiver<bool>,
        config: &BroadcastConfig,
    ) -> Self {
        Self {
            role,
            transport,
            audit,
            rx,
            pending,
            shutdown,
            delay: AdaptiveDelay::from_config(config),
            retry: RetryPolicy::from_config(config),
            send_timeout: config.send_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn delay(&self) -> &AdaptiveDelay {
        &self.delay
    }

    /// Drain the queue in FIFO order until the intake closes or shutdown is
    /// signalled
    pub async fn run(mut self) {
        info!("Broadcast worker started on {} connection", self.role);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match timeout(self.poll_interval, self.rx.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(item)) => {
                    self.deliver(item).await;
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
        info!("Broadcast worker on {} connection stopped", self.role);
    }

    /// Deliver one item, honouring mandated waits and the retry budget, and
    /// record the final state on its audit row
    pub async fn deliver(&mut self, item: OutboundMessage) -> Delivery {
        let mut attempts = 0u32;
        let mut last_failure = SendFailure::Timeout;

        while attempts < self.retry.max_attempts {
            self.delay.wait_turn().await;
            let outcome = self.attempt(&item).await;
            if outcome.consumes_retry() {
                attempts += 1;
            }

            match outcome {
                AttemptOutcome::Delivered { message_id } => {
                    attempts += 1;
                    self.delay.on_success();
                    debug!("Sent to {} as message {} (attempt {})", item.chat_id, message_id, attempts);
                    if let Some(id) = item.audit_id {
                        if let Err(e) = self.audit.mark_sent(id, Some(message_id), attempts).await {
                            warn!("Failed to record sent message {}: {}", id, e);
                        }
                    }
                    return Delivery::Sent { message_id, attempts };
                }
                AttemptOutcome::MandatoryWait(wait) => {
                    self.delay.on_mandatory_wait(wait);
                    warn!(
                        "Flood wait {}s for chat {}, adaptive delay now {}ms",
                        wait.as_secs(),
                        item.chat_id,
                        self.delay.current().as_millis()
                    );
                    if let Some(id) = item.audit_id {
                        if let Err(e) = self.audit.record_flood_wait(id, wait.as_secs()).await {
                            warn!("Failed to record flood wait for {}: {}", id, e);
                        }
                    }
                    sleep(wait).await;
                }
                AttemptOutcome::Retryable(failure) => {
                    self.delay.on_failure();
                    warn!(
                        "Send to {} failed (attempt {}/{}): {}",
                        item.chat_id,
                        attempts,
                        self.retry.max_attempts,
                        failure.message()
                    );
                    if attempts < self.retry.max_attempts {
                        sleep(self.retry.backoff(attempts)).await;
                    }
                    last_failure = failure;
                }
            }
        }

        error!(
            "Giving up on message to {} after {} attempts: {}",
            item.chat_id,
            attempts,
            last_failure.message()
        );
        if let Some(id) = item.audit_id {
            let message = last_failure.message();
            if let Err(e) = self
                .audit
                .mark_failed(id, Some(last_failure.code()), Some(&message), attempts)
                .await
            {
                warn!("Failed to record failed message {}: {}", id, e);
            }
        }
        Delivery::Failed {
            code: last_failure.code().to_string(),
            attempts,
        }
    }

    async fn attempt(&self, item: &OutboundMessage) -> AttemptOutcome {
        if !self.transport.is_connected() {
            debug!("{} connection dropped, reconnecting", self.role);
            if let Err(outcome) = settle(timeout(self.send_timeout, self.transport.connect()).await) {
                return outcome;
            }
        }

        let peer = match settle(timeout(self.send_timeout, self.transport.get_entity(item.chat_id)).await) {
            Ok(peer) => peer,
            Err(outcome) => return outcome,
        };

        match settle(timeout(self.send_timeout, self.transport.send_message(&peer, &item.text)).await) {
            Ok(sent) => AttemptOutcome::Delivered { message_id: sent.id },
            Err(outcome) => outcome,
        }
    }
}
