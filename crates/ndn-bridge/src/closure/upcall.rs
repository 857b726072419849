//! Upcall kinds, results and the managed callable trait

use crate::context::BridgeContext;
use crate::handle::{BorrowedHandle, HandleTag};
use super::record::NativeUpcallInfo;
use std::fmt;
use std::os::raw::c_int;
use std::sync::Arc;
use thiserror::Error;

/// Upcall kind codes delivered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum UpcallKind {
    /// Last upcall for a record; the engine will not use it again
    Final = 0,
    /// Incoming interest matched a registered filter
    Interest = 1,
    /// Incoming interest already consumed by another filter
    ConsumedInterest = 2,
    /// Content arrived for an expressed interest
    Content = 3,
    /// Expressed interest timed out
    InterestTimedOut = 4,
    /// Content arrived but its signature was not verified
    ContentUnverified = 5,
    /// Content arrived and failed verification
    ContentBad = 6,
}

impl UpcallKind {
    pub fn from_raw(code: c_int) -> Option<Self> {
        Some(match code {
            0 => UpcallKind::Final,
            1 => UpcallKind::Interest,
            2 => UpcallKind::ConsumedInterest,
            3 => UpcallKind::Content,
            4 => UpcallKind::InterestTimedOut,
            5 => UpcallKind::ContentUnverified,
            6 => UpcallKind::ContentBad,
            _ => return None,
        })
    }

    /// Whether the engine supplies a content object with this kind
    pub fn carries_content(self) -> bool {
        matches!(
            self,
            UpcallKind::Content | UpcallKind::ContentUnverified | UpcallKind::ContentBad
        )
    }

    /// Whether the engine supplies an interest with this kind
    pub fn carries_interest(self) -> bool {
        !matches!(self, UpcallKind::Final)
    }
}

impl fmt::Display for UpcallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpcallKind::Final => "FINAL",
            UpcallKind::Interest => "INTEREST",
            UpcallKind::ConsumedInterest => "CONSUMED_INTEREST",
            UpcallKind::Content => "CONTENT",
            UpcallKind::InterestTimedOut => "INTEREST_TIMED_OUT",
            UpcallKind::ContentUnverified => "CONTENT_UNVERIFIED",
            UpcallKind::ContentBad => "CONTENT_BAD",
        };
        f.write_str(name)
    }
}

/// Result codes returned to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum UpcallResult {
    Error = -1,
    Ok = 0,
    /// Re-express a timed-out interest
    Reexpress = 1,
    /// Interest was answered; later filters see it as consumed
    InterestConsumed = 2,
    Verify = 3,
    FetchKey = 4,
}

impl UpcallResult {
    pub fn from_raw(code: c_int) -> Option<Self> {
        Some(match code {
            -1 => UpcallResult::Error,
            0 => UpcallResult::Ok,
            1 => UpcallResult::Reexpress,
            2 => UpcallResult::InterestConsumed,
            3 => UpcallResult::Verify,
            4 => UpcallResult::FetchKey,
            _ => return None,
        })
    }
}

/// Failure raised by a managed callable
#[derive(Error, Debug)]
pub enum UpcallError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<crate::error::BridgeError> for UpcallError {
    fn from(e: crate::error::BridgeError) -> Self {
        UpcallError::Other(Box::new(e))
    }
}

/// Arguments of one upcall.
///
/// The content and interest are borrowed views valid only for the duration of
/// the invocation; use [`BorrowedHandle::to_owned_handle`] to keep one.
pub struct UpcallEvent<'a> {
    kind: UpcallKind,
    matched_comps: i32,
    content: Option<BorrowedHandle<'a>>,
    interest: Option<BorrowedHandle<'a>>,
}

impl<'a> UpcallEvent<'a> {
    pub(crate) fn from_native(
        ctx: &'a Arc<BridgeContext>,
        kind: UpcallKind,
        info: &'a NativeUpcallInfo,
    ) -> Self {
        // SAFETY: the engine keeps the info buffers alive for this invocation.
        let content = if kind.carries_content() {
            unsafe { info.content_bytes() }
                .and_then(|b| BorrowedHandle::borrow_buffer(ctx, HandleTag::ContentObject, b).ok())
        } else {
            None
        };
        let interest = if kind.carries_interest() {
            unsafe { info.interest_bytes() }
                .and_then(|b| BorrowedHandle::borrow_buffer(ctx, HandleTag::Interest, b).ok())
        } else {
            None
        };
        Self {
            kind,
            matched_comps: info.matched_comps,
            content,
            interest,
        }
    }

    pub fn kind(&self) -> UpcallKind {
        self.kind
    }

    /// Number of name components matched by the filter or interest
    pub fn matched_comps(&self) -> i32 {
        self.matched_comps
    }

    pub fn content(&self) -> Option<&BorrowedHandle<'a>> {
        self.content.as_ref()
    }

    pub fn interest(&self) -> Option<&BorrowedHandle<'a>> {
        self.interest.as_ref()
    }
}

impl fmt::Debug for UpcallEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpcallEvent")
            .field("kind", &self.kind)
            .field("matched_comps", &self.matched_comps)
            .field("content", &self.content.is_some())
            .field("interest", &self.interest.is_some())
            .finish()
    }
}

/// Managed callable registered with the engine
pub trait Closure: Send + Sync {
    fn upcall(&self, kind: UpcallKind, event: &UpcallEvent<'_>) -> Result<UpcallResult, UpcallError>;
}

/// Adapter turning a function into a [`Closure`]
pub struct FnClosure<F>(F);

impl<F> Closure for FnClosure<F>
where
    F: Fn(UpcallKind, &UpcallEvent<'_>) -> Result<UpcallResult, UpcallError> + Send + Sync,
{
    fn upcall(&self, kind: UpcallKind, event: &UpcallEvent<'_>) -> Result<UpcallResult, UpcallError> {
        (self.0)(kind, event)
    }
}

/// Wrap a function as a shareable callable
pub fn from_fn<F>(f: F) -> Arc<dyn Closure>
where
    F: Fn(UpcallKind, &UpcallEvent<'_>) -> Result<UpcallResult, UpcallError> + Send + Sync + 'static,
{
    Arc::new(FnClosure(f))
}
