//! Upcall failure reporting
//!
//! Failures raised by managed callables never unwind into the engine. Dispatch
//! converts them into the `Error` result code and hands a description to the
//! context's [`ErrorReporter`], which decides where it goes.

use crate::closure::UpcallKind;
use crate::error::BridgeError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One failed dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcallFailure {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Upcall kind being delivered, `None` if the engine passed an unknown code
    pub kind: Option<UpcallKind>,
    /// Rendered error
    pub message: String,
}

impl UpcallFailure {
    pub fn new(kind: Option<UpcallKind>, error: &BridgeError) -> Self {
        Self {
            timestamp: current_timestamp_ms(),
            kind,
            message: error.to_string(),
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!("[{}] {}", self.timestamp, self)
    }
}

impl fmt::Display for UpcallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "upcall {} failed: {}", kind, self.message),
            None => write!(f, "upcall failed: {}", self.message),
        }
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sink for failures raised during dispatch
pub trait ErrorReporter: Send + Sync {
    /// Record a failure
    fn report(&self, failure: UpcallFailure);

    /// All recorded failures (for testing)
    fn failures(&self) -> Vec<UpcallFailure>;

    /// Forget recorded failures (for testing)
    fn clear(&self);
}

/// Emits failures as `tracing` error events (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, failure: UpcallFailure) {
        tracing::error!(kind = ?failure.kind, "{}", failure.message);
    }

    fn failures(&self) -> Vec<UpcallFailure> {
        Vec::new()
    }

    fn clear(&self) {}
}

/// Keeps failures in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    entries: Arc<Mutex<Vec<UpcallFailure>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl ErrorReporter for MemoryReporter {
    fn report(&self, failure: UpcallFailure) {
        tracing::debug!(kind = ?failure.kind, "recording upcall failure");
        self.entries.lock().push(failure);
    }

    fn failures(&self) -> Vec<UpcallFailure> {
        self.entries.lock().clone()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Drops every failure
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl ErrorReporter for NullReporter {
    fn report(&self, _failure: UpcallFailure) {}

    fn failures(&self) -> Vec<UpcallFailure> {
        Vec::new()
    }

    fn clear(&self) {}
}
