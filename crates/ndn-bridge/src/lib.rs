//! NDN bridge - managed runtime binding for a native NDN engine
//!
//! This library provides the boundary layer between managed code and a native
//! protocol engine:
//! - Typed foreign handles with tag-selected release
//! - Closure registration and upcall dispatch
//! - Run-loop reentrancy tracking and the coarse execution lock
//! - Session facade, event loop and crypto adapter on top

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod closure;
pub mod context;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod handle;
pub mod lock;
pub mod logging;
pub mod report;
pub mod run_state;
pub mod session;
pub mod util;

// Re-export commonly used types
pub use closure::{Closure, UpcallError, UpcallEvent, UpcallKind, UpcallResult};
pub use context::{BridgeContext, BridgeContextBuilder};
pub use crypto::{Key, KeyAdapter};
pub use engine::{LoopbackEngine, NativeEngine};
pub use error::{BridgeError, BridgeResult};
pub use event_loop::{EventLoop, StopHandle};
pub use handle::{BorrowedHandle, Handle, HandleTag};
pub use lock::ExecutionLock;
pub use report::{ErrorReporter, MemoryReporter, UpcallFailure};
pub use run_state::RunStateTracker;
pub use session::Session;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
