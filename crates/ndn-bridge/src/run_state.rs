//! Run-loop reentrancy tracker
//!
//! Keeps one record per executing blocking `run` call so the bridge can answer
//! "is this session currently running". Records are keyed by session identity;
//! the newest record is found first.

use crate::engine::SessionPtr;
use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;

/// One in-flight run call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStateRecord {
    session: SessionPtr,
}

impl RunStateRecord {
    pub fn session(&self) -> SessionPtr {
        self.session
    }
}

/// Context-wide list of in-flight run calls
#[derive(Debug, Default)]
pub struct RunStateTracker {
    records: Mutex<Vec<RunStateRecord>>,
}

impl RunStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a record for `session`
    pub fn begin(&self, session: SessionPtr) -> BridgeResult<RunStateRecord> {
        let mut records = self.records.lock();
        records
            .try_reserve(1)
            .map_err(|_| BridgeError::out_of_memory("run state record"))?;
        let record = RunStateRecord { session };
        records.push(record);
        Ok(record)
    }

    /// Most recent record for `session`, if any
    pub fn find(&self, session: SessionPtr) -> Option<RunStateRecord> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|r| r.session == session)
            .copied()
    }

    /// Remove the most recent record for `session`; no-op if there is none
    pub fn end(&self, session: SessionPtr) {
        let mut records = self.records.lock();
        if let Some(pos) = records.iter().rposition(|r| r.session == session) {
            records.remove(pos);
        }
    }

    pub fn is_running(&self, session: SessionPtr) -> bool {
        self.find(session).is_some()
    }

    /// Number of in-flight run calls across all sessions
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Push a record and remove it again when the returned guard drops
    pub fn enter(&self, session: SessionPtr) -> BridgeResult<RunGuard<'_>> {
        self.begin(session)?;
        Ok(RunGuard {
            tracker: self,
            session,
        })
    }
}

/// Ends a run record on every exit path
pub struct RunGuard<'a> {
    tracker: &'a RunStateTracker,
    session: SessionPtr,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end(self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use std::ptr::NonNull;

    fn session(addr: usize) -> SessionPtr {
        SessionPtr::new(NonNull::new(addr as *mut c_void).unwrap())
    }

    #[test]
    fn test_begin_find_end() {
        let tracker = RunStateTracker::new();
        let h = session(0x10);

        assert!(tracker.find(h).is_none());
        let record = tracker.begin(h).unwrap();
        assert_eq!(tracker.find(h), Some(record));
        tracker.end(h);
        assert!(tracker.find(h).is_none());
    }

    #[test]
    fn test_interleaved_sessions() {
        let tracker = RunStateTracker::new();
        let (h1, h2) = (session(0x10), session(0x20));

        tracker.begin(h1).unwrap();
        tracker.begin(h2).unwrap();
        tracker.end(h1);

        assert!(tracker.find(h2).is_some());
        assert!(tracker.find(h1).is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_end_without_begin_is_noop() {
        let tracker = RunStateTracker::new();
        tracker.begin(session(0x10)).unwrap();
        tracker.end(session(0x30));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_nested_runs_unwind_one_at_a_time() {
        let tracker = RunStateTracker::new();
        let h = session(0x10);
        tracker.begin(h).unwrap();
        tracker.begin(h).unwrap();

        tracker.end(h);
        assert!(tracker.is_running(h));
        tracker.end(h);
        assert!(!tracker.is_running(h));
    }

    #[test]
    fn test_guard_ends_on_panic() {
        let tracker = RunStateTracker::new();
        let h = session(0x10);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = tracker.enter(h).unwrap();
            assert!(tracker.is_running(h));
            panic!("engine blew up");
        }));

        assert!(result.is_err());
        assert!(tracker.is_empty());
    }
}
