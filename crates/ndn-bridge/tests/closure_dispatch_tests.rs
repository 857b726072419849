//! Closure registration and upcall dispatch tests

mod common;

use common::*;
use ndn_bridge::closure::{self, from_fn, NativeUpcallInfo, UpcallError};
use ndn_bridge::handle::{Handle, HandleTag};
use ndn_bridge::{ErrorReporter, LoopbackEngine, UpcallKind, UpcallResult};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn non_final_kind() -> impl Strategy<Value = UpcallKind> {
    prop::sample::select(vec![
        UpcallKind::Interest,
        UpcallKind::ConsumedInterest,
        UpcallKind::Content,
        UpcallKind::InterestTimedOut,
        UpcallKind::ContentUnverified,
        UpcallKind::ContentBad,
    ])
}

proptest! {
    /// The callable is retained exactly once from registration until Final.
    #[test]
    fn callable_retained_until_final(kinds in prop::collection::vec(non_final_kind(), 0..12)) {
        let bridge = TestBridge::new();
        let callable = Recorder::new().into_closure();
        let handle = closure::register(&bridge.ctx, &callable).unwrap();
        let record = handle.closure_ptr().unwrap();
        drop(handle);
        prop_assert_eq!(Arc::strong_count(&callable), 2);

        let content = LoopbackEngine::encode_content(b"/p", b"v");
        let info = NativeUpcallInfo::empty().with_interest(b"/p", 1).with_content(&content);
        for kind in &kinds {
            unsafe { record.invoke(*kind, &info) };
            prop_assert_eq!(Arc::strong_count(&callable), 2);
            prop_assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 1);
        }

        unsafe { record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };
        prop_assert_eq!(Arc::strong_count(&callable), 1);
        prop_assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 0);
        prop_assert_eq!(bridge.reporter.count(), 0);
    }
}

#[test]
fn test_callable_sees_kinds_in_engine_order() {
    let bridge = TestBridge::new();
    let recorder = Arc::new(Recorder::new());
    let callable: Arc<dyn ndn_bridge::Closure> = recorder.clone();
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    let content = LoopbackEngine::encode_content(b"/a/b", b"payload");
    let info = NativeUpcallInfo::empty().with_interest(b"/a/b", 2);
    unsafe {
        record.invoke(UpcallKind::Interest, &info);
        record.invoke(UpcallKind::Content, &info.with_content(&content));
        record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty());
    }

    assert_eq!(
        recorder.kinds(),
        vec![UpcallKind::Interest, UpcallKind::Content, UpcallKind::Final]
    );
    let seen = recorder.seen();
    assert_eq!(seen[0].interest.as_deref(), Some(&b"/a/b"[..]));
    assert_eq!(seen[0].matched_comps, 2);
    assert_eq!(seen[1].payload.as_deref(), Some(&b"payload"[..]));
    assert_eq!(seen[2].interest, None);
    assert_eq!(seen[2].payload, None);
}

#[test]
fn test_release_happens_after_final_returns() {
    let bridge = TestBridge::new();
    let ctx = Arc::clone(&bridge.ctx);
    let live_during_final = Arc::new(AtomicUsize::new(usize::MAX));
    let observed = Arc::clone(&live_during_final);
    let callable = from_fn(move |kind, _| {
        if kind == UpcallKind::Final {
            observed.store(ctx.registry().live_count(HandleTag::Closure), Ordering::SeqCst);
        }
        Ok(UpcallResult::Ok)
    });
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();
    drop(handle);

    unsafe { record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };

    assert_eq!(live_during_final.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 0);
}

#[test]
fn test_managed_handle_keeps_record_after_final() {
    let bridge = TestBridge::new();
    let callable = Recorder::new().into_closure();
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    unsafe { record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };
    assert!(!closure::is_armed(&handle));
    assert_eq!(handle.ref_count(), 1);
    assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 1);

    // Late upcalls on a finalized record are refused
    let result = unsafe { record.invoke(UpcallKind::Interest, &NativeUpcallInfo::empty()) };
    assert_eq!(result, UpcallResult::Error as c_int);

    drop(handle);
    assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 0);
}

#[test]
fn test_second_final_releases_nothing() {
    let bridge = TestBridge::new();
    let callable = Recorder::new().into_closure();
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();
    let info = NativeUpcallInfo::empty();
    assert_eq!(Arc::strong_count(&callable), 2);

    let first = unsafe { record.invoke(UpcallKind::Final, &info) };
    assert_eq!(first, UpcallResult::Ok as c_int);
    assert_eq!(Arc::strong_count(&callable), 1);
    assert_eq!(handle.ref_count(), 1);

    let second = unsafe { record.invoke(UpcallKind::Final, &info) };
    assert_eq!(second, UpcallResult::Error as c_int);
    assert_eq!(Arc::strong_count(&callable), 1);
    assert_eq!(handle.ref_count(), 1);

    drop(handle);
    assert_eq!(Arc::strong_count(&callable), 1);
    assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 0);
}

#[rstest]
#[case::error(false)]
#[case::panic(true)]
fn test_callable_failure_becomes_error(#[case] panics: bool) {
    let bridge = TestBridge::new();
    let callable = from_fn(move |kind, _| {
        if kind == UpcallKind::Final {
            return Ok(UpcallResult::Ok);
        }
        if panics {
            panic!("callable exploded");
        }
        Err(UpcallError::Failed("callable refused".to_string()))
    });
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    let result = unsafe { record.invoke(UpcallKind::Content, &NativeUpcallInfo::empty()) };

    assert_eq!(result, UpcallResult::Error as c_int);
    let failures = bridge.reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, Some(UpcallKind::Content));
    let expected = if panics { "callable exploded" } else { "callable refused" };
    assert!(failures[0].message.contains(expected), "{}", failures[0].message);

    // The record stays usable after a failure
    unsafe { record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };
    assert_eq!(bridge.reporter.count(), 1);
    assert_eq!(Arc::strong_count(&callable), 1);
}

#[test]
fn test_execution_lock_held_during_dispatch() {
    let bridge = TestBridge::new();
    let ctx = Arc::clone(&bridge.ctx);
    let held = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&held);
    let callable = from_fn(move |_, _| {
        *seen.lock() = Some(ctx.execution_lock().is_held_by_current_thread());
        Ok(UpcallResult::Ok)
    });
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    unsafe { record.invoke(UpcallKind::Interest, &NativeUpcallInfo::empty()) };
    assert_eq!(*held.lock(), Some(true));
    assert!(!bridge.ctx.execution_lock().is_held_by_current_thread());
    closure::abandon(&handle).unwrap();
}

#[test]
fn test_borrowed_content_copied_outlives_upcall() {
    let bridge = TestBridge::new();
    let kept: Arc<Mutex<Vec<Handle>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kept);
    let callable = from_fn(move |_, event| {
        if let Some(content) = event.content() {
            sink.lock().push(content.to_owned_handle()?);
        }
        Ok(UpcallResult::Ok)
    });
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    {
        let content = LoopbackEngine::encode_content(b"/kept", b"bytes");
        let info = NativeUpcallInfo::empty().with_content(&content);
        unsafe { record.invoke(UpcallKind::Content, &info) };
    }
    unsafe { record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };
    drop(handle);

    let kept = kept.lock();
    assert_eq!(kept.len(), 1);
    let parsed = kept[0].parsed_content().unwrap();
    assert_eq!(&kept[0].bytes().unwrap()[parsed.payload.clone()], b"bytes");
}

#[test]
fn test_result_code_passes_through() {
    let bridge = TestBridge::new();
    let recorder = Recorder::replying(|kind, _| match kind {
        UpcallKind::InterestTimedOut => UpcallResult::Reexpress,
        UpcallKind::Interest => UpcallResult::InterestConsumed,
        _ => UpcallResult::Ok,
    });
    let callable = recorder.into_closure();
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();
    let info = NativeUpcallInfo::empty();

    unsafe {
        assert_eq!(record.invoke(UpcallKind::InterestTimedOut, &info), 1);
        assert_eq!(record.invoke(UpcallKind::Interest, &info), 2);
        assert_eq!(record.invoke(UpcallKind::ContentBad, &info), 0);
        assert_eq!(record.invoke(UpcallKind::Final, &info), 0);
    }
}

#[test]
fn test_unknown_kind_code_reported_without_kind() {
    let bridge = TestBridge::new();
    let callable = Recorder::new().into_closure();
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    let info = NativeUpcallInfo::empty();
    let result = unsafe { closure::upcall_trampoline(record.as_ptr(), 99, &info) };

    assert_eq!(result, UpcallResult::Error as c_int);
    let failures = bridge.reporter.failures();
    assert_eq!(failures[0].kind, None);
    assert_eq!(failures[0].message, "Invalid argument: unknown upcall kind 99");
    assert!(closure::is_armed(&handle));
    closure::abandon(&handle).unwrap();
}

#[test]
fn test_null_info_is_empty_event() {
    let bridge = TestBridge::new();
    let recorder = Arc::new(Recorder::new());
    let callable: Arc<dyn ndn_bridge::Closure> = recorder.clone();
    let handle = closure::register(&bridge.ctx, &callable).unwrap();
    let record = handle.closure_ptr().unwrap();

    let result = unsafe {
        closure::upcall_trampoline(record.as_ptr(), UpcallKind::Interest as c_int, std::ptr::null())
    };

    assert_eq!(result, 0);
    assert_eq!(recorder.seen()[0].interest, None);
    closure::abandon(&handle).unwrap();
}

#[test]
fn test_dropping_callable_reference_does_not_release_registration() {
    let bridge = TestBridge::new();
    let recorder = Arc::new(Recorder::new());
    let handle = {
        let callable: Arc<dyn ndn_bridge::Closure> = recorder.clone();
        closure::register(&bridge.ctx, &callable).unwrap()
    };
    let record = handle.closure_ptr().unwrap();
    drop(handle);

    unsafe { record.invoke(UpcallKind::Interest, &NativeUpcallInfo::empty()) };
    unsafe { record.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };
    assert_eq!(recorder.kinds(), vec![UpcallKind::Interest, UpcallKind::Final]);
    assert_eq!(Arc::strong_count(&recorder), 1);
}
