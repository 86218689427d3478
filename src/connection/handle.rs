//! One transport connection bound to its event-loop thread

use super::runner::LoopThread;
use crate::broadcast::Broadcaster;
use crate::transport::{Role, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// State written by the loop thread and read by callers
#[derive(Default)]
pub(crate) struct LoopShared {
    pub connected: AtomicBool,
    pub broadcaster: OnceLock<Arc<Broadcaster>>,
}

pub struct ConnectionHandle {
    pub role: Role,
    transport: Arc<dyn Transport>,
    thread: LoopThread,
    shared: Arc<LoopShared>,
}

impl ConnectionHandle {
    pub(crate) fn new(role: Role, transport: Arc<dyn Transport>, thread: LoopThread, shared: Arc<LoopShared>) -> Self {
        Self {
            role,
            transport,
            thread,
            shared,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn thread(&self) -> &LoopThread {
        &self.thread
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn broadcaster(&self) -> Option<Arc<Broadcaster>> {
        self.shared.broadcaster.get().cloned()
    }

    /// Connected, loop alive and able to take broadcasts
    pub fn is_viable(&self) -> bool {
        self.thread.is_alive() && self.is_connected() && self.shared.broadcaster.get().is_some()
    }

    /// Drain the broadcast queue, disconnect and stop the loop thread
    pub fn close(mut self, drain_timeout: Duration, stop_timeout: Duration) {
        debug!("Closing {} connection", self.role);
        if self.thread.is_alive() {
            if let Some(broadcaster) = self.broadcaster() {
                let drained = self.thread.call(drain_timeout + Duration::from_secs(1), async move {
                    broadcaster.shutdown(drain_timeout).await
                });
                match drained {
                    Ok(true) => {}
                    Ok(false) => warn!("{} queue closed with undelivered messages", self.role),
                    Err(e) => warn!("Failed to drain {} queue: {}", self.role, e),
                }
            }

            let transport = Arc::clone(&self.transport);
            if let Err(e) = self
                .thread
                .call(stop_timeout, async move { transport.disconnect().await })
            {
                warn!("Failed to disconnect {} connection: {}", self.role, e);
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.thread.stop(stop_timeout);
    }
}
