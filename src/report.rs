//! Failure reporting for session establishment.
//!
//! DESIGN
//! ======
//! A boundary never hands activation errors back to whoever rendered it.
//! They go to an [`ErrorReporter`] instead. Reporters are synchronous so
//! they can be called from the activation task without extra scheduling.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::frame::{ErrorCode, now_ms};
use crate::sync::SyncError;

/// Raised when the sync service cannot open a session for a boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("session establishment failed on channel {channel_id}: {source}")]
pub struct SessionEstablishmentFailure {
    pub channel_id: Uuid,
    pub client_id: Uuid,
    #[source]
    pub source: SyncError,
}

impl ErrorCode for SessionEstablishmentFailure {
    fn error_code(&self) -> &'static str {
        self.source.error_code()
    }

    fn retryable(&self) -> bool {
        self.source.retryable()
    }
}

/// Serializable record of one reported failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub id: Uuid,
    pub ts: i64,
    pub channel_id: Uuid,
    pub client_id: Uuid,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&SessionEstablishmentFailure> for FailureReport {
    fn from(failure: &SessionEstablishmentFailure) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: now_ms(),
            channel_id: failure.channel_id,
            client_id: failure.client_id,
            code: failure.error_code(),
            message: failure.to_string(),
            retryable: failure.retryable(),
        }
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, failure: &SessionEstablishmentFailure);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, failure: &SessionEstablishmentFailure) {
        log_failure(failure);
    }
}

fn log_failure(failure: &SessionEstablishmentFailure) {
    error!(
        channel_id = %failure.channel_id,
        client_id = %failure.client_id,
        code = failure.error_code(),
        retryable = failure.retryable(),
        error = %failure.source,
        "sync: session establishment failed"
    );
}

/// Bounded in-memory log of recent failures. Oldest entries are dropped
/// once `capacity` is reached.
pub struct DiagnosticsLog {
    capacity: usize,
    entries: Mutex<VecDeque<FailureReport>>,
}

impl DiagnosticsLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Recent failures, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FailureReport> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorReporter for DiagnosticsLog {
    fn report(&self, failure: &SessionEstablishmentFailure) {
        log_failure(failure);
        if self.capacity == 0 {
            return;
        }
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(FailureReport::from(failure));
    }
}

#[cfg(test)]
#[path = "report_test.rs"]
mod tests;
