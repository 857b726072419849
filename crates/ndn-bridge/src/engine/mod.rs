//! Native engine boundary
//!
//! [`NativeEngine`] is the surface the bridge needs from a protocol engine:
//! session lifecycle, the blocking run loop, interest/content exchange and the
//! structural parsers. Pointers crossing this boundary are wrapped in `Copy`
//! newtypes; the engine owns what they point at.
//!
//! [`LoopbackEngine`] is an in-process engine used by tests and local setups.

pub mod loopback;

pub use loopback::{LoopbackEngine, LoopbackStats};

pub use crate::closure::ClosurePtr;
use crate::crypto::KeyAdapter;
use crate::handle::{CharBuf, ParsedContent, ParsedInterest};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr::NonNull;

/// Forwarding flag: the registration is active
pub const FORW_ACTIVE: i32 = 1;
/// Forwarding flag: the registration applies to longer names too
pub const FORW_CHILD_INHERIT: i32 = 2;

macro_rules! native_ptr {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonNull<c_void>);

        // Engine objects are only dereferenced by the engine that created them.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            pub fn new(ptr: NonNull<c_void>) -> Self {
                Self(ptr)
            }

            pub fn as_ptr(self) -> *mut c_void {
                self.0.as_ptr()
            }

            pub fn as_non_null(self) -> NonNull<c_void> {
                self.0
            }

            pub fn addr(self) -> usize {
                self.0.as_ptr() as usize
            }
        }
    };
}

native_ptr!(
    /// Engine session
    SessionPtr
);
native_ptr!(
    /// Engine key object
    KeyPtr
);

/// Operations the bridge calls on a protocol engine.
///
/// Every method taking a [`SessionPtr`] expects one returned by this engine's
/// [`create_session`](NativeEngine::create_session) and not yet destroyed.
/// Negative statuses mean failure; the reason is available from
/// [`last_error`](NativeEngine::last_error).
pub trait NativeEngine: Send + Sync {
    /// Allocate a disconnected session; `None` on allocation failure
    fn create_session(&self) -> Option<SessionPtr>;

    /// Free a session. Every closure still registered with it receives a
    /// final upcall before this returns.
    ///
    /// # Safety
    ///
    /// `session` must not be used afterwards.
    unsafe fn destroy_session(&self, session: SessionPtr);

    /// Connect to the daemon; returns the connection descriptor or a negative status
    fn connect(&self, session: SessionPtr) -> c_int;

    fn disconnect(&self, session: SessionPtr) -> c_int;

    /// Connection descriptor, negative when disconnected
    fn connection_fd(&self, session: SessionPtr) -> c_int;

    /// Pump the event loop. `timeout_ms` of 0 performs one pass; a negative
    /// value uses the session's run timeout.
    fn run(&self, session: SessionPtr, timeout_ms: c_int) -> c_int;

    /// Set the session's run timeout, returning the previous one
    fn set_run_timeout(&self, session: SessionPtr, timeout_ms: c_int) -> c_int;

    /// Process due timers; returns microseconds until the next deadline
    fn process_scheduled_operations(&self, session: SessionPtr) -> c_int;

    fn output_is_pending(&self, session: SessionPtr) -> bool;

    fn express_interest(
        &self,
        session: SessionPtr,
        name: &[u8],
        closure: ClosurePtr,
        template: Option<&[u8]>,
    ) -> c_int;

    /// Register `closure` for interests under `name`; `None` removes the
    /// registration. A replaced closure receives a final upcall.
    fn set_interest_filter(
        &self,
        session: SessionPtr,
        name: &[u8],
        closure: Option<ClosurePtr>,
        forw_flags: c_int,
    ) -> c_int;

    /// Blocking fetch of one content object into `out`
    fn get(
        &self,
        session: SessionPtr,
        name: &[u8],
        template: Option<&[u8]>,
        timeout_ms: c_int,
        out: &mut CharBuf,
    ) -> c_int;

    fn put(&self, session: SessionPtr, content: &[u8]) -> c_int;

    /// Engine-local error code of the last failed operation (0 if unknown)
    fn last_error(&self, session: SessionPtr) -> c_int;

    /// Structural parse of an encoded content object
    fn parse_content(&self, bytes: &[u8]) -> Result<ParsedContent, c_int>;

    /// Structural parse of an encoded interest
    fn parse_interest(&self, bytes: &[u8]) -> Result<ParsedInterest, c_int>;

    /// Free a key object
    ///
    /// # Safety
    ///
    /// `key` must not be used afterwards.
    unsafe fn free_key(&self, key: KeyPtr);

    /// Key operations backed by this engine's key objects, if supported
    fn key_adapter(&self) -> Option<&dyn KeyAdapter> {
        None
    }
}
