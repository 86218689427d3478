//! Messaging transport contract
//!
//! The relay does not speak the chat protocol itself. A host plugs in a
//! client library behind [`Transport`] and hands a [`TransportFactory`] to
//! the connection manager, which creates one transport per connection role.

use crate::error::BotError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Listener,
    Sender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Listener => "listener",
            Role::Sender => "sender",
        })
    }
}

/// Where a connection keeps its authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    File(PathBuf),
    Token(String),
    /// No stored session; the account must sign in
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: i64,
    pub access_hash: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub message_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    User,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: i64,
    pub name: String,
    pub kind: DialogKind,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Mandatory cooldown imposed by the server
    #[error("flood wait of {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("not connected")]
    Disconnected,

    #[error("authorization required")]
    Unauthorized,

    #[error("{kind}: {message}")]
    Rpc { kind: String, message: String },
}

impl TransportError {
    pub fn rpc(kind: &str, message: impl Into<String>) -> Self {
        TransportError::Rpc {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Short classification stored as the audit error code
    pub fn kind(&self) -> &str {
        match self {
            TransportError::FloodWait { .. } => "FLOOD_WAIT",
            TransportError::Disconnected => "DISCONNECTED",
            TransportError::Unauthorized => "AUTH_REQUIRED",
            TransportError::Rpc { kind, .. } => kind,
        }
    }
}

impl From<TransportError> for BotError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::FloodWait { seconds } => BotError::RateLimited { wait_seconds: seconds },
            TransportError::Disconnected => BotError::NotConnected,
            TransportError::Unauthorized => BotError::AuthRequired,
            TransportError::Rpc { kind, message } => BotError::Transport { kind, message },
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// One client connection. Calls are made only from the event loop that owns
/// the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> TransportResult<()>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self);

    async fn is_user_authorized(&self) -> TransportResult<bool>;

    async fn send_code_request(&self, phone: &str) -> TransportResult<()>;

    /// Complete sign-in; returns the portable session token
    async fn sign_in(&self, phone: &str, code: &str, password: Option<&str>) -> TransportResult<String>;

    async fn get_entity(&self, chat_id: i64) -> TransportResult<Peer>;

    async fn send_message(&self, peer: &Peer, text: &str) -> TransportResult<SentMessage>;

    /// New-message events. Only one subscriber is expected.
    async fn subscribe(&self) -> TransportResult<mpsc::Receiver<InboundMessage>>;

    async fn dialogs(&self) -> TransportResult<Vec<Dialog>>;

    fn session_string(&self) -> Option<String>;
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, role: Role, session: &SessionIdentity) -> Arc<dyn Transport>;
}
