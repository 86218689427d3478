//! Connection manager
//!
//! Owns up to two transport connections against the same account: the
//! listener, which receives chat messages and also broadcasts, and an
//! on-demand sender used when the host must transmit before the listener is
//! ready. Each runs on its own thread with a single-threaded event loop;
//! other threads only reach a loop by scheduling work on it and waiting with
//! a timeout.

mod handle;
mod listener;
mod runner;

#[cfg(test)]
mod tests;

pub use handle::ConnectionHandle;
pub use runner::{call, run_detached, spawn_loop, LoopThread};

use crate::audit::AuditStore;
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::error::{BotError, Result};
use crate::parser::{RuleStore, SignalParser};
use crate::transport::{Dialog, InboundMessage, Role, SessionIdentity, Transport, TransportFactory};
use crate::types::Signal;
use handle::LoopShared;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const DIALOGS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    AuthRequired,
    Connected,
    Listening,
    Error(String),
    Stopped,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::AuthRequired => f.write_str("AUTH_REQUIRED"),
            ConnectionStatus::Connected => f.write_str("CONNECTED"),
            ConnectionStatus::Listening => f.write_str("LISTENING"),
            ConnectionStatus::Error(message) => write!(f, "ERROR: {message}"),
            ConnectionStatus::Stopped => f.write_str("STOPPED"),
        }
    }
}

/// Result of `connect_for_sending`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReadiness {
    Ready,
    /// The listener is still starting; buffer and retry
    Pending,
    Failed,
}

pub type SignalCallback = Arc<dyn Fn(Signal) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Host callbacks. They run on the listener thread and must not block.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_signal: Option<SignalCallback>,
    on_message: Option<MessageCallback>,
    on_status: Option<StatusCallback>,
}

impl Callbacks {
    pub fn on_signal(mut self, f: impl Fn(Signal) + Send + Sync + 'static) -> Self {
        self.on_signal = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&InboundMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_status(mut self, f: impl Fn(ConnectionStatus) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Arc::new(f));
        self
    }
}

pub(crate) struct Inner {
    config: Config,
    factory: Arc<dyn TransportFactory>,
    audit: Arc<dyn AuditStore>,
    rules: Option<Arc<dyn RuleStore>>,
    parser: Arc<SignalParser>,
    dedup: Mutex<DedupCache>,
    /// Keys whose enqueue is under way; always locked after `dedup`
    in_flight: Mutex<HashSet<String>>,
    callbacks: RwLock<Callbacks>,
    monitored: RwLock<HashSet<i64>>,
    running: AtomicBool,
    starting: AtomicBool,
    listener: Mutex<Option<ConnectionHandle>>,
    sender: Mutex<Option<ConnectionHandle>>,
    send_lock: Mutex<()>,
    auth_transport: Mutex<Option<Arc<dyn Transport>>>,
    signed_in_session: RwLock<Option<String>>,
}

impl Inner {
    fn emit(&self, status: ConnectionStatus) {
        info!("Connection status: {}", status);
        let callback = self.callbacks.read().on_status.clone();
        if let Some(callback) = callback {
            callback(status);
        }
    }

    fn startup_failed(&self, status: ConnectionStatus) {
        self.starting.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.emit(status);
    }
}

pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: Config, factory: Arc<dyn TransportFactory>, audit: Arc<dyn AuditStore>) -> Self {
        let dedup = DedupCache::new(config.broadcast.dedup_capacity);
        let monitored = config.telegram.monitored_chats.iter().copied().collect();
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                audit,
                rules: None,
                parser: Arc::new(SignalParser::new()),
                dedup: Mutex::new(dedup),
                in_flight: Mutex::new(HashSet::new()),
                callbacks: RwLock::new(Callbacks::default()),
                monitored: RwLock::new(monitored),
                running: AtomicBool::new(false),
                starting: AtomicBool::new(false),
                listener: Mutex::new(None),
                sender: Mutex::new(None),
                send_lock: Mutex::new(()),
                auth_transport: Mutex::new(None),
                signed_in_session: RwLock::new(None),
            }),
        }
    }

    /// Custom pattern rules are loaded from `store` on every start
    pub fn with_rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.rules = Some(store);
        }
        self
    }

    pub fn parser(&self) -> Arc<SignalParser> {
        Arc::clone(&self.inner.parser)
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.inner.callbacks.write() = callbacks;
    }

    /// Chats whose messages are parsed; empty accepts every chat
    pub fn set_monitored_chats(&self, chats: &[i64]) {
        *self.inner.monitored.write() = chats.iter().copied().collect();
        debug!("Monitoring {} chats", chats.len());
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_starting(&self) -> bool {
        self.inner.starting.load(Ordering::SeqCst)
    }

    /// Start the listener on its own thread. Progress is reported through the
    /// status callback.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Listener already running");
            return Ok(());
        }
        self.inner.starting.store(true, Ordering::SeqCst);

        let drain = self.inner.config.broadcast.drain_timeout();
        let wait = self.inner.config.listener.stop_timeout();
        // Only one session may be live per account: the sender goes first
        let stale = (self.inner.sender.lock().take(), self.inner.listener.lock().take());
        for handle in [stale.0, stale.1].into_iter().flatten() {
            handle.close(drain, wait);
        }
        self.release_auth_transport();

        let session = self.session_for(Role::Listener);
        let transport = self.inner.factory.create(Role::Listener, &session);
        let shared = Arc::new(LoopShared::default());

        let thread = {
            let inner = Arc::clone(&self.inner);
            let transport = Arc::clone(&transport);
            let shared = Arc::clone(&shared);
            spawn_loop(Role::Listener, move |stop| listener::run(inner, transport, shared, stop))
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                error!("Failed to start listener thread: {}", e);
                self.inner.startup_failed(ConnectionStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        *self.inner.listener.lock() = Some(ConnectionHandle::new(Role::Listener, transport, thread, shared));
        info!("Listener thread started");
        Ok(())
    }

    /// Drain queues, disconnect both connections and stop their threads
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.starting.store(false, Ordering::SeqCst);

        let drain = self.inner.config.broadcast.drain_timeout();
        let wait = self.inner.config.listener.stop_timeout();
        let listener = self.inner.listener.lock().take();
        let sender = self.inner.sender.lock().take();
        for handle in [listener, sender].into_iter().flatten() {
            handle.close(drain, wait);
        }
        self.release_auth_transport();
        self.inner.emit(ConnectionStatus::Stopped);
    }

    fn listener_viable(&self) -> bool {
        self.inner
            .listener
            .lock()
            .as_ref()
            .is_some_and(ConnectionHandle::is_viable)
    }

    fn sender_viable(&self) -> bool {
        self.inner
            .sender
            .lock()
            .as_ref()
            .is_some_and(ConnectionHandle::is_viable)
    }

    /// Make sure some connection can broadcast, opening the sender
    /// connection if needed
    pub fn connect_for_sending(&self) -> SendReadiness {
        if self.listener_viable() {
            return SendReadiness::Ready;
        }
        if self.is_starting() {
            return SendReadiness::Pending;
        }

        let _guard = self.inner.send_lock.lock();
        if self.listener_viable() || self.sender_viable() {
            return SendReadiness::Ready;
        }
        if self.is_starting() {
            return SendReadiness::Pending;
        }

        let stale = self.inner.sender.lock().take();
        if let Some(handle) = stale {
            handle.close(
                self.inner.config.broadcast.drain_timeout(),
                self.inner.config.listener.stop_timeout(),
            );
        }

        match self.open_sender() {
            Ok(handle) => {
                *self.inner.sender.lock() = Some(handle);
                SendReadiness::Ready
            }
            Err(e) => {
                warn!("Sender connection failed: {}", e);
                SendReadiness::Failed
            }
        }
    }

    fn open_sender(&self) -> Result<ConnectionHandle> {
        let session = self.session_for(Role::Sender);
        let transport = self.inner.factory.create(Role::Sender, &session);
        let shared = Arc::new(LoopShared::default());
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let thread = {
            let transport = Arc::clone(&transport);
            let shared = Arc::clone(&shared);
            let audit = Arc::clone(&self.inner.audit);
            let config = self.inner.config.broadcast.clone();
            spawn_loop(Role::Sender, move |stop| async move {
                let ready = async {
                    transport.connect().await?;
                    if !transport.is_user_authorized().await? {
                        return Err(BotError::AuthRequired);
                    }
                    Ok::<(), BotError>(())
                }
                .await;
                if let Err(e) = ready {
                    let _ = ready_tx.send(Err(e));
                    return;
                }

                let broadcaster = Broadcaster::spawn(Role::Sender, Arc::clone(&transport), audit, config);
                let _ = shared.broadcaster.set(broadcaster);
                shared.connected.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));
                info!("Sender connection ready");

                let _ = stop.await;
                shared.connected.store(false, Ordering::SeqCst);
            })?
        };

        let handle = ConnectionHandle::new(Role::Sender, transport, thread, shared);
        let wait = self.inner.config.listener.sender_connect_wait();
        let outcome = match ready_rx.recv_timeout(wait) {
            Ok(result) => result,
            Err(_) => Err(BotError::Timeout(format!("sender not connected within {wait:?}"))),
        };
        match outcome {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.close(Duration::ZERO, self.inner.config.listener.stop_timeout());
                Err(e)
            }
        }
    }

    /// Loop handle and broadcaster of the connection that should carry a
    /// send, waiting briefly for a listener that is still starting
    fn broadcast_target(&self) -> Option<(Arc<Broadcaster>, bool)> {
        let pick = |slot: &Mutex<Option<ConnectionHandle>>| {
            slot.lock()
                .as_ref()
                .filter(|h| h.is_viable())
                .and_then(|h| h.broadcaster().map(|b| (b, h.thread().is_current())))
        };

        if self.is_starting() {
            let deadline = Instant::now() + self.inner.config.listener.ready_wait();
            while self.is_starting() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
        }

        if let Some(target) = pick(&self.inner.listener) {
            return Some(target);
        }
        match self.connect_for_sending() {
            SendReadiness::Ready => pick(&self.inner.listener).or_else(|| pick(&self.inner.sender)),
            SendReadiness::Pending => {
                warn!("Listener still starting, message not sent");
                None
            }
            SendReadiness::Failed => None,
        }
    }

    fn runtime_for(&self, role: Role) -> Option<tokio::runtime::Handle> {
        let slot = match role {
            Role::Listener => &self.inner.listener,
            Role::Sender => &self.inner.sender,
        };
        slot.lock().as_ref().map(|h| h.thread().runtime().clone())
    }

    /// Queue `text` for `chat_id`. A repeated `dedup_key` is a successful
    /// no-op, also while the first send with that key is still being queued.
    /// Returns true once the enqueue is confirmed.
    pub fn send_message(&self, chat_id: i64, text: &str, dedup_key: Option<&str>) -> bool {
        let Some(key) = dedup_key else {
            return self.enqueue(chat_id, text, None);
        };
        if !self.reserve_key(key) {
            debug!("Duplicate message {} skipped", key);
            return true;
        }

        let confirmed = self.enqueue(chat_id, text, Some(key));
        // A failed enqueue releases the key so the caller can retry
        let mut dedup = self.inner.dedup.lock();
        self.inner.in_flight.lock().remove(key);
        if confirmed {
            dedup.insert(key);
        }
        confirmed
    }

    fn reserve_key(&self, key: &str) -> bool {
        let dedup = self.inner.dedup.lock();
        !dedup.contains(key) && self.inner.in_flight.lock().insert(key.to_string())
    }

    fn enqueue(&self, chat_id: i64, text: &str, dedup_key: Option<&str>) -> bool {
        let Some((broadcaster, on_loop_thread)) = self.broadcast_target() else {
            return false;
        };
        let Some(runtime) = self.runtime_for(broadcaster.role()) else {
            return false;
        };

        let text = text.to_string();
        let key = dedup_key.map(str::to_string);
        let submit = async move { broadcaster.submit(chat_id, &text, key.as_deref()).await };

        if on_loop_thread {
            // Called from a host callback on the loop itself: cannot block here
            runtime.spawn(submit);
            return true;
        }
        match call(&runtime, self.inner.config.broadcast.enqueue_timeout(), submit) {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("Message to {} not queued: {}", chat_id, e);
                false
            }
            Err(e) => {
                warn!("Enqueue to {} not confirmed: {}", chat_id, e);
                false
            }
        }
    }

    /// Ask the server to send a login code
    pub fn request_code(&self, phone: &str) -> Result<()> {
        let transport = self.auth_transport();
        let phone = phone.to_string();
        run_detached("auth", async move {
            if !transport.is_connected() {
                transport.connect().await?;
            }
            transport.send_code_request(&phone).await?;
            Ok::<_, BotError>(())
        })??;
        info!("Login code requested");
        Ok(())
    }

    /// Complete login and return the session token
    pub fn sign_in(&self, phone: &str, code: &str, password: Option<&str>) -> Result<String> {
        let transport = self.auth_transport();
        let (phone, code, password) = (phone.to_string(), code.to_string(), password.map(str::to_string));
        let session = run_detached("auth", async move {
            if !transport.is_connected() {
                transport.connect().await?;
            }
            let session = transport.sign_in(&phone, &code, password.as_deref()).await?;
            // The listener reconnects with the new session on start
            transport.disconnect().await;
            Ok::<_, BotError>(session)
        })??;
        self.inner.auth_transport.lock().take();
        *self.inner.signed_in_session.write() = Some(session.clone());
        info!("Signed in");
        Ok(session)
    }

    fn auth_transport(&self) -> Arc<dyn Transport> {
        let mut slot = self.inner.auth_transport.lock();
        let transport = slot.get_or_insert_with(|| {
            let session = self.session_for(Role::Listener);
            self.inner.factory.create(Role::Listener, &session)
        });
        Arc::clone(transport)
    }

    /// Disconnect a login connection that never completed sign-in
    fn release_auth_transport(&self) {
        let pending = self.inner.auth_transport.lock().take();
        if let Some(transport) = pending {
            debug!("Closing unfinished login connection");
            if let Err(e) = run_detached("auth", async move { transport.disconnect().await }) {
                warn!("Failed to close login connection: {}", e);
            }
        }
    }

    /// Session for a new connection. A file session is updated in place by
    /// sign-in; otherwise the token from the last sign-in wins over config.
    fn session_for(&self, role: Role) -> SessionIdentity {
        let telegram = &self.inner.config.telegram;
        let signed_in = self.inner.signed_in_session.read().clone();
        match (&telegram.session_file, signed_in) {
            (None, Some(token)) => SessionIdentity::Token(token),
            _ => telegram.session_for(role),
        }
    }

    /// Session token of the active (or signing-in) connection
    pub fn session_string(&self) -> Option<String> {
        let listener = self.inner.listener.lock().as_ref().map(|h| Arc::clone(h.transport()));
        let auth = self.inner.auth_transport.lock().clone();
        listener
            .and_then(|t| t.session_string())
            .or_else(|| self.inner.signed_in_session.read().clone())
            .or_else(|| auth.and_then(|t| t.session_string()))
            .or_else(|| self.inner.config.telegram.session_string.clone())
    }

    /// Chats visible to the listener account
    pub fn available_dialogs(&self) -> Result<Vec<Dialog>> {
        let target = self
            .inner
            .listener
            .lock()
            .as_ref()
            .filter(|h| h.is_connected())
            .map(|h| (Arc::clone(h.transport()), h.thread().runtime().clone()));
        let Some((transport, runtime)) = target else {
            return Err(BotError::NotConnected);
        };

        let dialogs = call(&runtime, DIALOGS_TIMEOUT, async move { transport.dialogs().await })??;
        Ok(dialogs)
    }

    /// Reload custom pattern rules from the rule store
    pub fn reload_custom_rules(&self) -> Result<usize> {
        let Some(store) = self.inner.rules.clone() else {
            return Ok(self.inner.parser.rule_count());
        };
        let parser = Arc::clone(&self.inner.parser);
        run_detached("rules", async move { parser.reload_from(store.as_ref()).await })?
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
