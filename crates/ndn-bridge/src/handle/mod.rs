//! Typed foreign handles
//!
//! Every native object visible to managed code is wrapped in a handle carrying a
//! [`HandleTag`]. Owned handles ([`Handle`]) release their pointee exactly once,
//! using the routine the tag selects. Borrowed handles ([`BorrowedHandle`]) are
//! views of engine-owned objects restricted to a scope.
//!
//! ContentObject and Interest handles carry a parse cache filled on first
//! structured access. Closure handles carry the callable the engine invokes.

mod borrowed;
mod charbuf;
mod owned;
mod parse;
mod registry;
mod tag;

pub use borrowed::BorrowedHandle;
pub use charbuf::{CharBuf, SigningParams};
pub use owned::Handle;
pub(crate) use owned::{HandleInner, SideChannel};
pub use parse::{ParseContext, Parsed, ParsedContent, ParsedInterest};
pub use registry::HandleRegistry;
pub use tag::HandleTag;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};

pub(crate) fn parse_content_cached<'p>(
    ctx: &BridgeContext,
    cache: &'p ParseContext,
    bytes: &[u8],
) -> BridgeResult<&'p ParsedContent> {
    let parsed = cache.get_or_try_init(|| {
        ctx.engine()
            .parse_content(bytes)
            .map(Parsed::Content)
            .map_err(|code| BridgeError::native("parse_content", code))
    })?;
    match parsed {
        Parsed::Content(content) => Ok(content),
        Parsed::Interest(_) => Err(BridgeError::InvalidArgument(
            "cached parse is an interest".to_string(),
        )),
    }
}

pub(crate) fn parse_interest_cached<'p>(
    ctx: &BridgeContext,
    cache: &'p ParseContext,
    bytes: &[u8],
) -> BridgeResult<&'p ParsedInterest> {
    let parsed = cache.get_or_try_init(|| {
        ctx.engine()
            .parse_interest(bytes)
            .map(Parsed::Interest)
            .map_err(|code| BridgeError::native("parse_interest", code))
    })?;
    match parsed {
        Parsed::Interest(interest) => Ok(interest),
        Parsed::Content(_) => Err(BridgeError::InvalidArgument(
            "cached parse is a content object".to_string(),
        )),
    }
}
