//! Multi-threaded dispatch stress tests

mod common;

use common::*;
use ndn_bridge::closure::{from_fn, UpcallError};
use ndn_bridge::handle::HandleTag;
use ndn_bridge::{UpcallKind, UpcallResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;
const EVENTS: usize = 25;

#[test]
fn test_parallel_sessions_deliver_every_event_once() {
    let bridge = TestBridge::new();
    let seed = bridge.session();
    for i in 0..EVENTS {
        seed.put(&bridge.content(&format!("/stress/{}", i), b"x")).unwrap();
    }

    let contents = Arc::new(AtomicUsize::new(0));
    let finals = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let session = bridge.session();
            let ctx = Arc::clone(&bridge.ctx);
            let (contents, finals, barrier) = (
                Arc::clone(&contents),
                Arc::clone(&finals),
                Arc::clone(&barrier),
            );
            thread::spawn(move || {
                let callable = from_fn(move |kind, _| {
                    match kind {
                        UpcallKind::Content => contents.fetch_add(1, Ordering::SeqCst),
                        UpcallKind::Final => finals.fetch_add(1, Ordering::SeqCst),
                        _ => 0,
                    };
                    Ok(UpcallResult::Ok)
                });
                barrier.wait();
                for i in 0..EVENTS {
                    let name = ndn_bridge::Handle::from_bytes(
                        &ctx,
                        HandleTag::Name,
                        format!("/stress/{}", i).as_bytes(),
                    )
                    .unwrap();
                    session.express_interest(&name, &callable, None).unwrap();
                }
                session.run(None).unwrap();
                assert_eq!(Arc::strong_count(&callable), 1);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(contents.load(Ordering::SeqCst), THREADS * EVENTS);
    assert_eq!(finals.load(Ordering::SeqCst), THREADS * EVENTS);
    assert!(bridge.ctx.run_state().is_empty());
    assert_eq!(bridge.ctx.registry().live_count(HandleTag::Closure), 0);
    assert_eq!(bridge.reporter.count(), 0);
}

#[test]
fn test_handles_dropped_on_other_threads_during_dispatch() {
    let bridge = TestBridge::with_lifetime(Duration::from_millis(5));
    let session = bridge.session();
    let callable = Recorder::new().into_closure();
    for i in 0..EVENTS {
        session
            .express_interest(&bridge.name(&format!("/gone/{}", i)), &callable, None)
            .unwrap();
    }

    let droppers: Vec<_> = (0..THREADS)
        .map(|t| {
            let handles: Vec<_> = (0..EVENTS)
                .map(|i| bridge.content(&format!("/drop/{}/{}", t, i), b"v"))
                .collect();
            thread::spawn(move || {
                for handle in handles {
                    drop(handle);
                    thread::yield_now();
                }
            })
        })
        .collect();
    session.run(None).unwrap();
    for dropper in droppers {
        dropper.join().unwrap();
    }

    assert_eq!(bridge.ctx.registry().total_live(), 1);
    assert_eq!(bridge.ctx.registry().live_count(HandleTag::Session), 1);
    assert_eq!(Arc::strong_count(&callable), 1);
}

#[test]
fn test_producer_thread_serves_consumer_threads() {
    let bridge = TestBridge::new();
    let producer_session = Arc::new(bridge.session());
    let producer = Producer::new(b"served");
    producer.attach(&producer_session);
    let filter: Arc<dyn ndn_bridge::Closure> = producer.clone();
    producer_session
        .set_interest_filter(&bridge.name("/served"), &filter, None)
        .unwrap();

    let consumers: Vec<_> = (0..4)
        .map(|t| {
            let session = bridge.session();
            let name = bridge.name(&format!("/served/{}", t));
            thread::spawn(move || session.get(&name, None, Some(5000)).unwrap().is_some())
        })
        .collect();

    let serving = {
        let session = Arc::clone(&producer_session);
        let producer = Arc::clone(&producer);
        thread::spawn(move || {
            while producer.answered.lock().len() < 4 {
                session.run(Some(5)).unwrap();
            }
        })
    };

    let fetched: Vec<bool> = consumers.into_iter().map(|c| c.join().unwrap()).collect();
    serving.join().unwrap();

    assert_eq!(fetched, vec![true; 4]);
    assert_eq!(bridge.reporter.count(), 0);
}

#[test]
fn test_upcall_and_direct_caller_share_a_session() {
    let bridge = TestBridge::new();
    let shared = Arc::new(bridge.session());
    let server = Arc::new(bridge.session());
    let asker = bridge.session();

    let (entered_tx, entered_rx) = mpsc::channel();
    let entered_tx = Mutex::new(Some(entered_tx));
    let filter = {
        let shared = Arc::clone(&shared);
        let name = bridge.name("/shared/from-upcall");
        let callable = Recorder::new().into_closure();
        from_fn(move |kind, _| {
            if kind == UpcallKind::Interest {
                if let Some(tx) = entered_tx.lock().take() {
                    let _ = tx.send(());
                }
                // Hold the execution lock while the other thread takes the handle lock
                thread::sleep(Duration::from_millis(100));
                shared
                    .express_interest(&name, &callable, None)
                    .map_err(|e| UpcallError::Failed(e.to_string()))?;
            }
            Ok(UpcallResult::Ok)
        })
    };
    server
        .set_interest_filter(&bridge.name("/shared"), &filter, None)
        .unwrap();
    asker
        .express_interest(&bridge.name("/shared/question"), &Recorder::new().into_closure(), None)
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let upcall = {
        let server = Arc::clone(&server);
        let done = done_tx.clone();
        thread::spawn(move || {
            let ok = server.run(Some(50)).is_ok();
            let _ = done.send(("upcall", ok));
        })
    };
    let direct = {
        let shared = Arc::clone(&shared);
        let name = bridge.name("/shared/direct");
        let callable = Recorder::new().into_closure();
        thread::spawn(move || {
            entered_rx.recv().unwrap();
            let ok = shared.express_interest(&name, &callable, None).is_ok();
            let _ = done_tx.send(("direct", ok));
        })
    };

    let mut finished: Vec<_> = (0..2)
        .map_while(|_| done_rx.recv_timeout(Duration::from_secs(5)).ok())
        .collect();
    finished.sort();
    assert_eq!(finished, vec![("direct", true), ("upcall", true)]);

    upcall.join().unwrap();
    direct.join().unwrap();
    assert_eq!(bridge.reporter.count(), 0);
}
