//! Owned handles
//!
//! A [`Handle`] owns one native object. Clones share ownership; when the last
//! clone goes away the object is released with the routine its tag selects,
//! under the context's execution lock.

use super::{parse_content_cached, parse_interest_cached};
use super::{CharBuf, HandleTag, ParseContext, ParsedContent, ParsedInterest, SigningParams};
use crate::closure::{Closure, ClosurePtr, NativeClosure, Retained};
use crate::context::BridgeContext;
use crate::engine::{KeyPtr, SessionPtr};
use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::trace;

pub(crate) type CallableSlot = Mutex<Option<Retained<dyn Closure>>>;

/// Per-handle auxiliary state
pub(crate) enum SideChannel {
    Empty,
    Parse(ParseContext),
    Callable(CallableSlot),
}

pub(crate) struct HandleInner {
    tag: HandleTag,
    ptr: NonNull<c_void>,
    side: SideChannel,
    ctx: Arc<BridgeContext>,
}

// The pointee is exclusively owned by this handle and released under the
// execution lock; shared access only reads immutable buffers.
unsafe impl Send for HandleInner {}
unsafe impl Sync for HandleInner {}

impl HandleInner {
    pub(crate) fn tag(&self) -> HandleTag {
        self.tag
    }

    pub(crate) fn ctx(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub(crate) fn callable_slot(&self) -> Option<&CallableSlot> {
        match &self.side {
            SideChannel::Callable(slot) => Some(slot),
            _ => None,
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let _guard = ctx.execution_lock().acquire();
        trace!(tag = %self.tag, ptr = ?self.ptr, "releasing handle");
        // SAFETY: this handle exclusively owns `ptr`, allocated as its tag requires.
        unsafe { release(&ctx, self.tag, self.ptr, &mut self.side) };
        ctx.registry().note_released(self.tag);
    }
}

unsafe fn release(ctx: &BridgeContext, tag: HandleTag, ptr: NonNull<c_void>, side: &mut SideChannel) {
    match tag {
        HandleTag::Session => {
            let session = SessionPtr::new(ptr);
            ctx.engine().disconnect(session);
            ctx.engine().destroy_session(session);
        }
        HandleTag::Closure => {
            drop(Box::from_raw(ptr.as_ptr().cast::<NativeClosure>()));
            if let SideChannel::Callable(slot) = side {
                drop(slot.get_mut().take());
            }
        }
        HandleTag::ContentObject
        | HandleTag::ExclusionFilter
        | HandleTag::Interest
        | HandleTag::KeyLocator
        | HandleTag::Name
        | HandleTag::Signature
        | HandleTag::SignedInfo => drop(Box::from_raw(ptr.as_ptr().cast::<CharBuf>())),
        HandleTag::PrivateKey | HandleTag::PublicKey => ctx.engine().free_key(KeyPtr::new(ptr)),
        HandleTag::SigningParams => drop(Box::from_raw(ptr.as_ptr().cast::<SigningParams>())),
    }
}

/// Owning, tagged reference to a native object
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    /// Wrap `ptr` in a handle of kind `tag`.
    ///
    /// # Safety
    ///
    /// `ptr` must be exclusively owned and allocated the way `tag`'s release
    /// routine expects: a boxed `CharBuf` for buffer tags, a boxed
    /// `NativeClosure` for closures, a boxed `SigningParams`, or an engine
    /// session or key created by `ctx`'s engine.
    pub unsafe fn create(ctx: &Arc<BridgeContext>, tag: HandleTag, ptr: NonNull<c_void>) -> Handle {
        let side = if tag.has_parse_cache() {
            SideChannel::Parse(ParseContext::new())
        } else if tag == HandleTag::Closure {
            SideChannel::Callable(Mutex::new(None))
        } else {
            SideChannel::Empty
        };
        Self::with_side(ctx, tag, ptr, side)
    }

    pub(crate) unsafe fn with_side(
        ctx: &Arc<BridgeContext>,
        tag: HandleTag,
        ptr: NonNull<c_void>,
        side: SideChannel,
    ) -> Handle {
        ctx.registry().note_created(tag);
        trace!(tag = %tag, ?ptr, "created handle");
        Handle {
            inner: Arc::new(HandleInner {
                tag,
                ptr,
                side,
                ctx: Arc::clone(ctx),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<HandleInner> {
        &self.inner
    }

    /// Copy `bytes` into a new buffer handle
    pub fn from_bytes(ctx: &Arc<BridgeContext>, tag: HandleTag, bytes: &[u8]) -> BridgeResult<Handle> {
        Self::from_charbuf(ctx, tag, CharBuf::from_slice(bytes)?)
    }

    /// Take ownership of `buf` as a buffer handle
    pub fn from_charbuf(ctx: &Arc<BridgeContext>, tag: HandleTag, buf: CharBuf) -> BridgeResult<Handle> {
        if !tag.is_buffer() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} does not wrap a byte buffer",
                tag
            )));
        }
        let ptr = NonNull::from(Box::leak(Box::new(buf))).cast::<c_void>();
        // SAFETY: freshly boxed CharBuf for a buffer tag.
        Ok(unsafe { Self::create(ctx, tag, ptr) })
    }

    /// Allocate a new, disconnected engine session
    pub fn new_session(ctx: &Arc<BridgeContext>) -> BridgeResult<Handle> {
        let session = ctx
            .engine()
            .create_session()
            .ok_or_else(|| BridgeError::out_of_memory("session"))?;
        // SAFETY: fresh session from this context's engine.
        Ok(unsafe { Self::create(ctx, HandleTag::Session, session.as_non_null()) })
    }

    pub fn from_signing_params(ctx: &Arc<BridgeContext>, params: SigningParams) -> Handle {
        let ptr = NonNull::from(Box::leak(Box::new(params))).cast::<c_void>();
        // SAFETY: freshly boxed SigningParams.
        unsafe { Self::create(ctx, HandleTag::SigningParams, ptr) }
    }

    /// Wrap an engine key.
    ///
    /// # Safety
    ///
    /// `key` must come from `ctx`'s engine and be exclusively owned by the caller.
    pub unsafe fn from_key(ctx: &Arc<BridgeContext>, tag: HandleTag, key: KeyPtr) -> BridgeResult<Handle> {
        match tag {
            HandleTag::PrivateKey | HandleTag::PublicKey => Ok(Self::create(ctx, tag, key.as_non_null())),
            other => Err(BridgeError::InvalidArgument(format!("{} is not a key", other))),
        }
    }

    pub fn tag(&self) -> HandleTag {
        self.inner.tag
    }

    /// Native pointer, provided the handle is of kind `expected`
    pub fn get(&self, expected: HandleTag) -> BridgeResult<NonNull<c_void>> {
        if self.inner.tag == expected {
            Ok(self.inner.ptr)
        } else {
            Err(BridgeError::TypeMismatch {
                expected,
                found: self.inner.tag,
            })
        }
    }

    pub fn is_valid(&self, expected: HandleTag) -> bool {
        self.inner.tag == expected
    }

    pub fn charbuf(&self) -> BridgeResult<&CharBuf> {
        if !self.inner.tag.is_buffer() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} does not wrap a byte buffer",
                self.inner.tag
            )));
        }
        // SAFETY: buffer tags always point at a CharBuf owned by this handle.
        Ok(unsafe { &*self.inner.ptr.as_ptr().cast::<CharBuf>() })
    }

    pub fn bytes(&self) -> BridgeResult<&[u8]> {
        self.charbuf().map(CharBuf::as_slice)
    }

    pub fn session_ptr(&self) -> BridgeResult<SessionPtr> {
        self.get(HandleTag::Session).map(SessionPtr::new)
    }

    pub fn key_ptr(&self, expected: HandleTag) -> BridgeResult<KeyPtr> {
        match expected {
            HandleTag::PrivateKey | HandleTag::PublicKey => self.get(expected).map(KeyPtr::new),
            other => Err(BridgeError::InvalidArgument(format!("{} is not a key", other))),
        }
    }

    pub fn closure_ptr(&self) -> BridgeResult<ClosurePtr> {
        self.get(HandleTag::Closure)
            .map(|p| ClosurePtr::new(p.cast::<NativeClosure>()))
    }

    pub fn signing_params(&self) -> BridgeResult<&SigningParams> {
        let ptr = self.get(HandleTag::SigningParams)?;
        // SAFETY: SigningParams handles point at a boxed SigningParams.
        Ok(unsafe { &*ptr.as_ptr().cast::<SigningParams>() })
    }

    /// Cached structural parse of a ContentObject handle
    pub fn parsed_content(&self) -> BridgeResult<&ParsedContent> {
        self.get(HandleTag::ContentObject)?;
        let cache = self.parse_cache()?;
        parse_content_cached(&self.inner.ctx, cache, self.bytes()?)
    }

    /// Cached structural parse of an Interest handle
    pub fn parsed_interest(&self) -> BridgeResult<&ParsedInterest> {
        self.get(HandleTag::Interest)?;
        let cache = self.parse_cache()?;
        parse_interest_cached(&self.inner.ctx, cache, self.bytes()?)
    }

    /// Whether the parse cache has been filled
    pub fn is_parsed(&self) -> bool {
        matches!(&self.inner.side, SideChannel::Parse(cache) if cache.is_filled())
    }

    fn parse_cache(&self) -> BridgeResult<&ParseContext> {
        match &self.inner.side {
            SideChannel::Parse(cache) => Ok(cache),
            _ => Err(BridgeError::InvalidArgument(format!(
                "{} carries no parse cache",
                self.inner.tag
            ))),
        }
    }

    /// Whether both handles share one native object
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of owners of the native object, including internal ones
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.inner.ctx
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Handle");
        s.field("tag", &self.inner.tag).field("ptr", &self.inner.ptr);
        if let Ok(buf) = self.charbuf() {
            s.field("bytes", buf);
        }
        s.finish()
    }
}
