//! Result of a single delivery attempt

use crate::audit::TIMEOUT;
use crate::transport::{TransportError, TransportResult};
use std::time::Duration;
use tokio::time::error::Elapsed;

#[derive(Debug, Clone, PartialEq)]
pub enum SendFailure {
    Timeout,
    Transport(TransportError),
}

impl SendFailure {
    pub fn code(&self) -> &str {
        match self {
            SendFailure::Timeout => TIMEOUT,
            SendFailure::Transport(e) => e.kind(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            SendFailure::Timeout => "send timed out".to_string(),
            SendFailure::Transport(e) => e.to_string(),
        }
    }
}

/// What one attempt means for the retry budget.
///
/// A mandated wait is honoured and the same item retried; it never uses up
/// an attempt. Only `Retryable` failures do.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Delivered { message_id: i64 },
    MandatoryWait(Duration),
    Retryable(SendFailure),
}

impl AttemptOutcome {
    pub fn consumes_retry(&self) -> bool {
        matches!(self, AttemptOutcome::Retryable(_))
    }
}

/// Map a timed transport call to its value or the outcome that ends the attempt
pub(crate) fn settle<T>(result: Result<TransportResult<T>, Elapsed>) -> Result<T, AttemptOutcome> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(TransportError::FloodWait { seconds })) => {
            Err(AttemptOutcome::MandatoryWait(Duration::from_secs(seconds)))
        }
        Ok(Err(e)) => Err(AttemptOutcome::Retryable(SendFailure::Transport(e))),
        Err(_) => Err(AttemptOutcome::Retryable(SendFailure::Timeout)),
    }
}
