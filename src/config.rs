//! Configuration
//!
//! Loaded from an optional TOML file overlaid with `COPYTRADE__SECTION__KEY`
//! environment variables. Every field has a default, so an empty file is a
//! valid configuration.

use crate::error::Result;
use crate::transport::{Role, SessionIdentity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = shellexpand::tilde(path).into_owned();
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(&path)).required(false))
            .add_source(
                config::Environment::with_prefix("COPYTRADE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("telegram.monitored_chats")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.database.path = shellexpand::tilde(&config.database.path).into_owned();
        config.telegram.session_file = config
            .telegram
            .session_file
            .map(|p| shellexpand::tilde(&p).into_owned());
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub api_id: i32,
    #[serde(default)]
    pub api_hash: String,
    /// Session file for the listener; the sender uses `<file>_send`
    pub session_file: Option<String>,
    /// Portable session token, shared by both connections
    pub session_string: Option<String>,
    /// Chats whose messages are parsed. Empty means all chats.
    #[serde(default)]
    pub monitored_chats: Vec<i64>,
}

impl TelegramConfig {
    /// Session for a connection role. A file-backed listener session gets a
    /// separate file for the sender so both can stay signed in.
    pub fn session_for(&self, role: Role) -> SessionIdentity {
        match (&self.session_file, &self.session_string, role) {
            (Some(file), _, Role::Listener) => SessionIdentity::File(PathBuf::from(file)),
            (Some(file), _, Role::Sender) => SessionIdentity::File(PathBuf::from(format!("{file}_send"))),
            (None, Some(token), _) => SessionIdentity::Token(token.clone()),
            (None, None, _) => SessionIdentity::Fresh,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Floor of the adaptive inter-send delay
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Consecutive successes before the delay decays
    #[serde(default = "default_success_streak")]
    pub success_streak: u32,
    #[serde(default = "default_delay_decay")]
    pub delay_decay: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff step, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Append `[unix time]` so identical texts are not filtered by the transport
    #[serde(default = "default_true")]
    pub append_timestamp: bool,
    #[serde(default = "default_audit_payload_max")]
    pub audit_payload_max: usize,
}

fn default_base_delay_ms() -> u64 {
    400
}
fn default_success_streak() -> u32 {
    10
}
fn default_delay_decay() -> f64 {
    0.9
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1500
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_enqueue_timeout_ms() -> u64 {
    2000
}
fn default_drain_timeout_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_queue_capacity() -> usize {
    1000
}
fn default_dedup_capacity() -> usize {
    crate::dedup::DEFAULT_CAPACITY
}
fn default_audit_payload_max() -> usize {
    500
}
fn default_true() -> bool {
    true
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            success_streak: default_success_streak(),
            delay_decay: default_delay_decay(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            dedup_capacity: default_dedup_capacity(),
            append_timestamp: true,
            audit_payload_max: default_audit_payload_max(),
        }
    }
}

impl BroadcastConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Acknowledge received copy-trading instructions back to their chat
    #[serde(default)]
    pub auto_ack: bool,
    /// How long a send waits for a listener that is still starting
    #[serde(default = "default_ready_wait_ms")]
    pub ready_wait_ms: u64,
    #[serde(default = "default_sender_connect_wait_ms")]
    pub sender_connect_wait_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_ready_wait_ms() -> u64 {
    3000
}
fn default_sender_connect_wait_ms() -> u64 {
    5000
}
fn default_stop_timeout_ms() -> u64 {
    5000
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            auto_ack: false,
            ready_wait_ms: default_ready_wait_ms(),
            sender_connect_wait_ms: default_sender_connect_wait_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl ListenerConfig {
    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    pub fn sender_connect_wait(&self) -> Duration {
        Duration::from_millis(self.sender_connect_wait_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "data/copytrade.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}
