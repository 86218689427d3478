//! Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    /// Session exists but the account is not signed in
    #[error("Authorization required")]
    AuthRequired,

    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport-mandated cooldown
    #[error("Rate limited, wait {wait_seconds}s")]
    RateLimited { wait_seconds: u64 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error ({kind}): {message}")]
    Transport { kind: String, message: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Broadcast queue full")]
    QueueFull,

    #[error("Broadcast queue closed")]
    QueueClosed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, BotError>;
