//! Bridge error taxonomy
//!
//! Errors raised inside the engine surface here at the call that invoked the
//! engine operation. Errors raised by managed callables during dispatch are
//! converted to the engine's `Error` result code and never unwind into native code;
//! they are still described by [`BridgeError::UpcallPropagation`] when reported.

use crate::handle::HandleTag;
use ndn_bridge_config::ConfigError;
use thiserror::Error;

/// Errors produced by the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Handle tag does not match the expected kind
    #[error("Argument needs to be of {} type, got {}", .expected.capsule_name(), .found.capsule_name())]
    TypeMismatch { expected: HandleTag, found: HandleTag },

    /// Allocation of a boundary structure failed
    #[error("Out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },

    /// Negative status returned by the native engine
    #[error("{operation} failed: {message} [{code}]")]
    NativeCallFailure {
        operation: &'static str,
        code: i32,
        message: String,
    },

    /// Managed failure escaping a dispatch invocation
    #[error("Upcall for {kind} failed: {message}")]
    UpcallPropagation { kind: String, message: String },

    /// Operation is not allowed while the session's run call is executing
    #[error("{operation} must not be called while run is executing")]
    RunInProgress { operation: &'static str },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid PEM data: {0}")]
    Pem(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used throughout the crate
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Build a `NativeCallFailure` from an engine-local error code.
    ///
    /// A zero code means the engine failed without recording a reason.
    pub fn native(operation: &'static str, code: i32) -> Self {
        let message = if code == 0 {
            "unknown reason (possibly not connected to the daemon)".to_string()
        } else {
            std::io::Error::from_raw_os_error(code).to_string()
        };
        BridgeError::NativeCallFailure {
            operation,
            code,
            message,
        }
    }

    pub fn out_of_memory(what: &'static str) -> Self {
        BridgeError::OutOfMemory { what }
    }
}
