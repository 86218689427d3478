//! Scripted in-process transport for tests and host integration checks

use crate::transport::{
    Dialog, InboundMessage, Peer, Role, SentMessage, SessionIdentity, Transport, TransportError,
    TransportFactory, TransportResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted response to the next `send_message` call
#[derive(Debug, Clone)]
pub enum ScriptedSend {
    Ok,
    FloodWait(u64),
    Fail(TransportError),
    /// Never completes; exercises the send timeout
    Hang,
}

pub struct FakeTransport {
    connected: AtomicBool,
    authorized: AtomicBool,
    connect_delay: Mutex<Duration>,
    connect_error: Mutex<Option<TransportError>>,
    script: Mutex<VecDeque<ScriptedSend>>,
    sent: Mutex<Vec<(i64, String)>>,
    send_attempts: AtomicUsize,
    connects: AtomicUsize,
    next_id: AtomicI64,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    session: Mutex<Option<String>>,
    dialogs: Mutex<Vec<Dialog>>,
    code_requests: Mutex<Vec<String>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Self {
            connected: AtomicBool::new(false),
            authorized: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            connect_error: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            next_id: AtomicI64::new(1000),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            session: Mutex::new(Some("fake-session".to_string())),
            dialogs: Mutex::new(Vec::new()),
            code_requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unauthorized() -> Arc<Self> {
        let transport = Self::default();
        transport.authorized.store(false, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn script(&self, responses: impl IntoIterator<Item = ScriptedSend>) {
        self.script.lock().extend(responses);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn fail_connect(&self, error: TransportError) {
        *self.connect_error.lock() = Some(error);
    }

    pub fn set_dialogs(&self, dialogs: Vec<Dialog>) {
        *self.dialogs.lock() = dialogs;
    }

    /// Simulate the server dropping the connection
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Deliver an inbound message as if it arrived from the server
    pub fn inject(&self, chat_id: i64, message_id: i64, text: &str) {
        let message = InboundMessage {
            chat_id,
            sender_id: Some(chat_id),
            message_id,
            text: text.to_string(),
        };
        let _ = self.inbound_tx.try_send(message);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> Vec<String> {
        self.code_requests.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> TransportResult<()> {
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let error = self.connect_error.lock().clone();
        if let Some(e) = error {
            return Err(e);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_user_authorized(&self) -> TransportResult<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn send_code_request(&self, phone: &str) -> TransportResult<()> {
        self.code_requests.lock().push(phone.to_string());
        Ok(())
    }

    async fn sign_in(&self, _phone: &str, code: &str, _password: Option<&str>) -> TransportResult<String> {
        if code != "12345" {
            return Err(TransportError::rpc("PHONE_CODE_INVALID", "invalid code"));
        }
        self.authorized.store(true, Ordering::SeqCst);
        let token = "signed-in-session".to_string();
        *self.session.lock() = Some(token.clone());
        Ok(token)
    }

    async fn get_entity(&self, chat_id: i64) -> TransportResult<Peer> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        Ok(Peer { id: chat_id, access_hash: None })
    }

    async fn send_message(&self, peer: &Peer, text: &str) -> TransportResult<SentMessage> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front().unwrap_or(ScriptedSend::Ok);
        match next {
            ScriptedSend::Ok => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.sent.lock().push((peer.id, text.to_string()));
                Ok(SentMessage { id })
            }
            ScriptedSend::FloodWait(seconds) => Err(TransportError::FloodWait { seconds }),
            ScriptedSend::Fail(e) => Err(e),
            ScriptedSend::Hang => std::future::pending().await,
        }
    }

    async fn subscribe(&self) -> TransportResult<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::rpc("ALREADY_SUBSCRIBED", "inbound stream already taken"))
    }

    async fn dialogs(&self) -> TransportResult<Vec<Dialog>> {
        Ok(self.dialogs.lock().clone())
    }

    fn session_string(&self) -> Option<String> {
        self.session.lock().clone()
    }
}

/// Hands out one fake per role and records what was requested
pub struct FakeFactory {
    pub listener: Arc<FakeTransport>,
    pub sender: Arc<FakeTransport>,
    created: Mutex<Vec<(Role, SessionIdentity)>>,
}

impl FakeFactory {
    pub fn new(listener: Arc<FakeTransport>, sender: Arc<FakeTransport>) -> Arc<Self> {
        Arc::new(Self {
            listener,
            sender,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> Vec<(Role, SessionIdentity)> {
        self.created.lock().clone()
    }
}

impl TransportFactory for FakeFactory {
    fn create(&self, role: Role, session: &SessionIdentity) -> Arc<dyn Transport> {
        self.created.lock().push((role, session.clone()));
        match role {
            Role::Listener => Arc::clone(&self.listener) as Arc<dyn Transport>,
            Role::Sender => Arc::clone(&self.sender) as Arc<dyn Transport>,
        }
    }
}
