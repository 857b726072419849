//! Registration and upcall dispatch
//!
//! [`register`] builds a native callback record whose entry point is
//! [`upcall_trampoline`], wraps it in a Closure handle and retains the managed
//! callable. While the engine may still call the record, the record's `data`
//! field holds a strong self-reference to that handle, so the handle outlives
//! every managed reference to it. The final upcall drops both the callable and
//! the self-reference.

use super::record::{ClosurePtr, NativeClosure, NativeUpcallInfo};
use super::retained::Retained;
use super::upcall::{Closure, UpcallEvent, UpcallKind, UpcallResult};
use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleInner, HandleTag, SideChannel};
use crate::report::UpcallFailure;
use parking_lot::Mutex;
use std::any::Any;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Wrap `callable` in a native callback record owned by a new Closure handle.
///
/// Takes one reference on `callable`, held until the final upcall or
/// [`abandon`].
pub fn register(ctx: &Arc<BridgeContext>, callable: &Arc<dyn Closure>) -> BridgeResult<Handle> {
    let _guard = ctx.execution_lock().acquire();

    let record = NonNull::from(Box::leak(Box::new(NativeClosure::new(upcall_trampoline))));
    let side = SideChannel::Callable(Mutex::new(Some(Retained::retain(callable))));
    // SAFETY: freshly boxed record for a Closure handle.
    let handle = unsafe { Handle::with_side(ctx, HandleTag::Closure, record.cast::<c_void>(), side) };

    let self_ref = Arc::into_raw(Arc::clone(handle.inner()));
    // SAFETY: the record is owned by `handle` and not yet shared with an engine.
    unsafe { (*record.as_ptr()).data = self_ref.cast::<c_void>() };

    trace!(record = ?record, "registered closure");
    Ok(handle)
}

/// Undo [`register`] for a record the engine never accepted.
///
/// Drops the retained callable and the self-reference now; the record itself is
/// freed with the last handle.
pub fn abandon(handle: &Handle) -> BridgeResult<()> {
    let record = handle.closure_ptr()?;
    let ctx = Arc::clone(handle.context());
    let _guard = ctx.execution_lock().acquire();

    if let Some(slot) = handle.inner().callable_slot() {
        let released = slot.lock().take();
        drop(released);
    }
    // SAFETY: `handle` keeps the record allocated.
    unsafe { release_self_ref(record) };
    debug!(record = ?record.as_ptr(), "abandoned closure");
    Ok(())
}

/// Whether the handle still retains its callable
pub fn is_armed(handle: &Handle) -> bool {
    handle
        .inner()
        .callable_slot()
        .map(|slot| slot.lock().is_some())
        .unwrap_or(false)
}

unsafe fn release_self_ref(record: ClosurePtr) {
    let data = std::mem::replace(&mut (*record.as_ptr()).data, ptr::null());
    if !data.is_null() {
        drop(Arc::from_raw(data.cast::<HandleInner>()));
    }
}

/// Entry point stored in every record built by [`register`].
///
/// # Safety
///
/// `selfp` must be a record built by [`register`] that has not received its
/// final upcall, and `info` must be null or valid for the duration of the call.
pub unsafe extern "C" fn upcall_trampoline(
    selfp: *mut NativeClosure,
    kind: c_int,
    info: *const NativeUpcallInfo,
) -> c_int {
    let Some(record) = NonNull::new(selfp) else {
        return UpcallResult::Error as c_int;
    };
    let info = if info.is_null() {
        NativeUpcallInfo::empty()
    } else {
        *info
    };
    dispatch(ClosurePtr::new(record), kind, &info) as c_int
}

/// Deliver one upcall to the callable behind `record`.
///
/// # Safety
///
/// Same contract as [`upcall_trampoline`].
pub unsafe fn dispatch(record: ClosurePtr, raw_kind: c_int, info: &NativeUpcallInfo) -> UpcallResult {
    let data = (*record.as_ptr()).data;
    if data.is_null() {
        warn!(kind = raw_kind, "upcall on a released closure record");
        return UpcallResult::Error;
    }

    // Keep the handle alive for this whole call, even if a nested upcall
    // releases the self-reference.
    let inner_ptr = data.cast::<HandleInner>();
    Arc::increment_strong_count(inner_ptr);
    let inner = Arc::from_raw(inner_ptr);
    let ctx = Arc::clone(inner.ctx());
    let guard = ctx.execution_lock().acquire();

    let kind = UpcallKind::from_raw(raw_kind);
    let result = match kind {
        None => {
            report(&ctx, None, BridgeError::InvalidArgument(format!("unknown upcall kind {}", raw_kind)));
            UpcallResult::Error
        }
        Some(_) if inner.tag() != HandleTag::Closure => {
            report(
                &ctx,
                kind,
                BridgeError::TypeMismatch {
                    expected: HandleTag::Closure,
                    found: inner.tag(),
                },
            );
            UpcallResult::Error
        }
        Some(kind) => invoke(&ctx, &inner, kind, info),
    };

    if kind == Some(UpcallKind::Final) {
        if let Some(slot) = inner.callable_slot() {
            let released = slot.lock().take();
            drop(released);
        }
        release_self_ref(record);
        trace!(record = ?record.as_ptr(), "closure finalized");
    }

    drop(guard);
    drop(inner);
    result
}

fn invoke(ctx: &Arc<BridgeContext>, inner: &HandleInner, kind: UpcallKind, info: &NativeUpcallInfo) -> UpcallResult {
    let callable = inner
        .callable_slot()
        .and_then(|slot| slot.lock().as_ref().map(Retained::share));
    let Some(callable) = callable else {
        debug!(%kind, "no callable retained, ignoring upcall");
        return UpcallResult::Error;
    };

    let event = UpcallEvent::from_native(ctx, kind, info);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callable.upcall(kind, &event)));
    drop(event);
    drop(callable);

    match outcome {
        Ok(Ok(result)) => {
            trace!(%kind, ?result, "upcall returned");
            result
        }
        Ok(Err(e)) => {
            report(
                ctx,
                Some(kind),
                BridgeError::UpcallPropagation {
                    kind: kind.to_string(),
                    message: e.to_string(),
                },
            );
            UpcallResult::Error
        }
        Err(payload) => {
            report(
                ctx,
                Some(kind),
                BridgeError::UpcallPropagation {
                    kind: kind.to_string(),
                    message: panic_message(payload.as_ref()),
                },
            );
            UpcallResult::Error
        }
    }
}

fn report(ctx: &BridgeContext, kind: Option<UpcallKind>, error: BridgeError) {
    ctx.reporter().report(UpcallFailure::new(kind, &error));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::{from_fn, UpcallError};
    use crate::engine::LoopbackEngine;
    use crate::report::{ErrorReporter, MemoryReporter};

    fn context() -> (Arc<BridgeContext>, MemoryReporter) {
        let reporter = MemoryReporter::new();
        let ctx = BridgeContext::builder(Arc::new(LoopbackEngine::new()))
            .reporter(Arc::new(reporter.clone()))
            .build();
        (ctx, reporter)
    }

    #[test]
    fn test_register_retains_once() {
        let (ctx, _) = context();
        let callable = from_fn(|_, _| Ok(UpcallResult::Ok));
        let handle = register(&ctx, &callable).unwrap();

        assert_eq!(Arc::strong_count(&callable), 2);
        assert_eq!(handle.tag(), HandleTag::Closure);
        assert!(is_armed(&handle));
    }

    #[test]
    fn test_final_releases_callable_and_self_ref() {
        let (ctx, _) = context();
        let callable = from_fn(|_, _| Ok(UpcallResult::Ok));
        let handle = register(&ctx, &callable).unwrap();
        let record = handle.closure_ptr().unwrap();
        drop(handle);
        assert_eq!(ctx.registry().live_count(HandleTag::Closure), 1);

        let info = NativeUpcallInfo::empty();
        let result = unsafe { record.invoke(UpcallKind::Final, &info) };

        assert_eq!(result, UpcallResult::Ok as c_int);
        assert_eq!(Arc::strong_count(&callable), 1);
        assert_eq!(ctx.registry().live_count(HandleTag::Closure), 0);
    }

    #[test]
    fn test_failure_becomes_error_code() {
        let (ctx, reporter) = context();
        let callable = from_fn(|_, _| Err(UpcallError::Failed("nope".to_string())));
        let handle = register(&ctx, &callable).unwrap();
        let record = handle.closure_ptr().unwrap();

        let info = NativeUpcallInfo::empty();
        let result = unsafe { record.invoke(UpcallKind::Interest, &info) };

        assert_eq!(result, UpcallResult::Error as c_int);
        assert_eq!(reporter.count(), 1);
        assert!(reporter.failures()[0].message.contains("nope"));
        abandon(&handle).unwrap();
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let (ctx, reporter) = context();
        let callable = from_fn(|_, _| Ok(UpcallResult::Ok));
        let handle = register(&ctx, &callable).unwrap();
        let record = handle.closure_ptr().unwrap();

        let info = NativeUpcallInfo::empty();
        let result = unsafe { upcall_trampoline(record.as_ptr(), 42, &info) };

        assert_eq!(result, UpcallResult::Error as c_int);
        assert_eq!(reporter.failures()[0].kind, None);
        abandon(&handle).unwrap();
    }

    #[test]
    fn test_abandon_releases_immediately() {
        let (ctx, _) = context();
        let callable = from_fn(|_, _| Ok(UpcallResult::Ok));
        let handle = register(&ctx, &callable).unwrap();

        abandon(&handle).unwrap();
        assert_eq!(Arc::strong_count(&callable), 1);
        assert!(!is_armed(&handle));
        assert_eq!(handle.ref_count(), 1);

        drop(handle);
        assert_eq!(ctx.registry().live_count(HandleTag::Closure), 0);
    }

    #[test]
    fn test_record_bound_to_other_tag_is_type_mismatch() {
        let (ctx, reporter) = context();
        let name = Handle::from_bytes(&ctx, HandleTag::Name, b"/a").unwrap();
        let mut record = NativeClosure::new(upcall_trampoline);
        record.data = Arc::into_raw(Arc::clone(name.inner())).cast::<c_void>();
        let ptr = ClosurePtr::new(NonNull::from(&mut record));

        let result = unsafe { ptr.invoke(UpcallKind::Interest, &NativeUpcallInfo::empty()) };

        assert_eq!(result, UpcallResult::Error as c_int);
        assert!(reporter.failures()[0].message.contains("Closure_ndn_data"));
        unsafe { release_self_ref(ptr) };
        assert_eq!(name.ref_count(), 1);
    }

    #[test]
    fn test_abandon_rejects_other_tags() {
        let (ctx, _) = context();
        let name = Handle::from_bytes(&ctx, HandleTag::Name, b"/a").unwrap();
        assert!(matches!(abandon(&name), Err(BridgeError::TypeMismatch { .. })));
    }
}
