//! Copy-Trading Signal Relay
//!
//! Turns free-form betting messages from chat channels into typed signals
//! and broadcasts copy-trading instructions back out reliably.
//!
//! ## Architecture
//!
//! ```text
//! Transport (listener) → Parser → Signal callback / SignalQueue
//!        ↑                           │
//!        │                           ↓ (ACK, COPY BET ...)
//!   Broadcast worker ← Broadcast queue ← ConnectionManager::send_message
//!        │
//!        ↓
//!  Audit tracker (SQLite)
//! ```

pub mod audit;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod signal_queue;
pub mod storage;
pub mod testing;
pub mod transport;
pub mod types;
