//! Adaptive inter-send delay and retry backoff

use crate::config::BroadcastConfig;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::warn;

const FALLBACK_DECAY: f64 = 0.9;

/// Minimum spacing between sends.
///
/// Mandated waits push the delay up to half the wait; a streak of successes
/// decays it back toward the base.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    base: Duration,
    current: Duration,
    decay: f64,
    streak_threshold: u32,
    streak: u32,
    last_send: Option<Instant>,
}

impl AdaptiveDelay {
    /// `decay` must lie in (0, 1]; values above 1 are capped and anything
    /// else falls back to 0.9
    pub fn new(base: Duration, streak_threshold: u32, decay: f64) -> Self {
        let decay = if decay.is_finite() && decay > 0.0 {
            decay.min(1.0)
        } else {
            warn!("Invalid delay decay {}, using {}", decay, FALLBACK_DECAY);
            FALLBACK_DECAY
        };
        Self {
            base,
            current: base,
            decay,
            streak_threshold: streak_threshold.max(1),
            streak: 0,
            last_send: None,
        }
    }

    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self::new(config.base_delay(), config.success_streak, config.delay_decay)
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Sleep until the current delay has passed since the previous send
    pub async fn wait_turn(&mut self) {
        if let Some(last) = self.last_send {
            let elapsed = last.elapsed();
            if elapsed < self.current {
                sleep(self.current - elapsed).await;
            }
        }
        self.last_send = Some(Instant::now());
    }

    pub fn on_success(&mut self) {
        self.streak += 1;
        if self.streak >= self.streak_threshold {
            self.current = self.current.mul_f64(self.decay).max(self.base);
            self.streak = 0;
        }
    }

    pub fn on_mandatory_wait(&mut self, wait: Duration) {
        self.streak = 0;
        self.current = self.current.max(wait / 2);
    }

    pub fn on_failure(&mut self) {
        self.streak = 0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            step: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Linear: the n-th failed attempt waits n steps
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}
