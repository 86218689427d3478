//! Bounded buffer of received signals for hosts that poll instead of
//! handling callbacks

use crate::types::Signal;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct SignalQueue {
    capacity: usize,
    signals: Mutex<VecDeque<Signal>>,
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            signals: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a signal, dropping the oldest one when full
    pub fn add(&self, signal: Signal) {
        let mut signals = self.signals.lock();
        signals.push_back(signal);
        if signals.len() > self.capacity {
            if let Some(dropped) = signals.pop_front() {
                debug!("Signal queue full, dropped {} signal", dropped.kind.name());
            }
        }
    }

    /// Snapshot of queued signals, oldest first
    pub fn pending(&self) -> Vec<Signal> {
        self.signals.lock().iter().cloned().collect()
    }

    /// Remove the first queued signal equal to `signal`
    pub fn remove(&self, signal: &Signal) -> bool {
        let mut signals = self.signals.lock();
        match signals.iter().position(|s| s == signal) {
            Some(index) => signals.remove(index).is_some(),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.signals.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }
}
