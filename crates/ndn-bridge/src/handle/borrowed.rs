//! Borrowed handles
//!
//! Views of engine-owned objects that are only valid for a bounded scope, such
//! as the content and interest passed to one upcall. They never release their
//! pointee and the lifetime parameter keeps them from outliving the scope.

use super::{parse_content_cached, parse_interest_cached};
use super::{Handle, HandleTag, ParseContext, ParsedContent, ParsedInterest};
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

enum View<'a> {
    Bytes(&'a [u8]),
    Raw(NonNull<c_void>, PhantomData<&'a c_void>),
}

/// Non-owning, tagged reference to a native object
pub struct BorrowedHandle<'a> {
    tag: HandleTag,
    view: View<'a>,
    parse: ParseContext,
    ctx: &'a Arc<BridgeContext>,
}

impl<'a> BorrowedHandle<'a> {
    /// Borrow an encoded buffer
    pub fn borrow_buffer(ctx: &'a Arc<BridgeContext>, tag: HandleTag, bytes: &'a [u8]) -> BridgeResult<Self> {
        if !tag.is_buffer() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} does not wrap a byte buffer",
                tag
            )));
        }
        Ok(Self {
            tag,
            view: View::Bytes(bytes),
            parse: ParseContext::new(),
            ctx,
        })
    }

    /// Borrow a non-buffer object such as a session or key.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for `'a` and be of the kind `tag` names.
    pub unsafe fn borrow(ctx: &'a Arc<BridgeContext>, tag: HandleTag, ptr: NonNull<c_void>) -> BridgeResult<Self> {
        if tag.is_buffer() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} must be borrowed from its bytes",
                tag
            )));
        }
        Ok(Self {
            tag,
            view: View::Raw(ptr, PhantomData),
            parse: ParseContext::new(),
            ctx,
        })
    }

    pub fn tag(&self) -> HandleTag {
        self.tag
    }

    /// Native pointer, provided the handle is of kind `expected`.
    ///
    /// For buffers this is the first byte of the borrowed data.
    pub fn get(&self, expected: HandleTag) -> BridgeResult<NonNull<c_void>> {
        if self.tag != expected {
            return Err(BridgeError::TypeMismatch {
                expected,
                found: self.tag,
            });
        }
        Ok(match self.view {
            View::Bytes(bytes) => NonNull::from(bytes).cast::<c_void>(),
            View::Raw(ptr, _) => ptr,
        })
    }

    pub fn is_valid(&self, expected: HandleTag) -> bool {
        self.tag == expected
    }

    pub fn bytes(&self) -> BridgeResult<&'a [u8]> {
        match self.view {
            View::Bytes(bytes) => Ok(bytes),
            View::Raw(..) => Err(BridgeError::InvalidArgument(format!(
                "{} does not wrap a byte buffer",
                self.tag
            ))),
        }
    }

    pub fn parsed_content(&self) -> BridgeResult<&ParsedContent> {
        self.get(HandleTag::ContentObject)?;
        parse_content_cached(self.ctx, &self.parse, self.bytes()?)
    }

    pub fn parsed_interest(&self) -> BridgeResult<&ParsedInterest> {
        self.get(HandleTag::Interest)?;
        parse_interest_cached(self.ctx, &self.parse, self.bytes()?)
    }

    /// Copy the borrowed buffer into an owned handle that outlives the scope
    pub fn to_owned_handle(&self) -> BridgeResult<Handle> {
        Handle::from_bytes(self.ctx, self.tag, self.bytes()?)
    }
}

impl fmt::Debug for BorrowedHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("BorrowedHandle");
        s.field("tag", &self.tag);
        match self.view {
            View::Bytes(bytes) => s.field("bytes", &crate::util::dump_charbuf(bytes)),
            View::Raw(ptr, _) => s.field("ptr", &ptr),
        };
        s.finish()
    }
}
