//! C-layout callback record shared with the engine

use super::upcall::{UpcallKind, UpcallResult};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr::{self, NonNull};

/// Engine-side signature of a callback entry point
pub type UpcallFn = unsafe extern "C" fn(
    selfp: *mut NativeClosure,
    kind: c_int,
    info: *const NativeUpcallInfo,
) -> c_int;

/// Callback record the engine stores and invokes.
///
/// `data` holds the bridge's self-reference to the owning handle while the
/// engine may still deliver upcalls; it is null once the final upcall ran.
#[repr(C)]
#[derive(Debug)]
pub struct NativeClosure {
    pub p: Option<UpcallFn>,
    pub data: *const c_void,
    pub refcount: c_int,
}

impl NativeClosure {
    pub fn new(entry: UpcallFn) -> Self {
        Self {
            p: Some(entry),
            data: ptr::null(),
            refcount: 0,
        }
    }
}

/// Upcall payload: borrowed views the engine keeps valid for one invocation
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeUpcallInfo {
    pub matched_comps: c_int,
    pub interest: *const u8,
    pub interest_len: usize,
    pub content: *const u8,
    pub content_len: usize,
}

impl NativeUpcallInfo {
    pub fn empty() -> Self {
        Self {
            matched_comps: 0,
            interest: ptr::null(),
            interest_len: 0,
            content: ptr::null(),
            content_len: 0,
        }
    }

    pub fn with_interest(mut self, interest: &[u8], matched_comps: c_int) -> Self {
        self.interest = interest.as_ptr();
        self.interest_len = interest.len();
        self.matched_comps = matched_comps;
        self
    }

    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.content = content.as_ptr();
        self.content_len = content.len();
        self
    }

    /// # Safety
    ///
    /// `interest`/`interest_len` must describe live memory for the lifetime of `self`.
    pub unsafe fn interest_bytes(&self) -> Option<&[u8]> {
        if self.interest.is_null() {
            None
        } else {
            Some(std::slice::from_raw_parts(self.interest, self.interest_len))
        }
    }

    /// # Safety
    ///
    /// `content`/`content_len` must describe live memory for the lifetime of `self`.
    pub unsafe fn content_bytes(&self) -> Option<&[u8]> {
        if self.content.is_null() {
            None
        } else {
            Some(std::slice::from_raw_parts(self.content, self.content_len))
        }
    }
}

/// Pointer to a [`NativeClosure`] as seen by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosurePtr(NonNull<NativeClosure>);

// The record is only touched under the context's execution lock.
unsafe impl Send for ClosurePtr {}
unsafe impl Sync for ClosurePtr {}

impl ClosurePtr {
    pub fn new(ptr: NonNull<NativeClosure>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut NativeClosure {
        self.0.as_ptr()
    }

    /// Invoke the record's entry point the way an engine does.
    ///
    /// # Safety
    ///
    /// The record must still be allocated.
    pub unsafe fn invoke(self, kind: UpcallKind, info: &NativeUpcallInfo) -> c_int {
        match (*self.0.as_ptr()).p {
            Some(entry) => entry(self.0.as_ptr(), kind as c_int, info),
            None => UpcallResult::Error as c_int,
        }
    }
}
