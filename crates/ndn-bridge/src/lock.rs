//! Coarse execution lock
//!
//! One lock per [`BridgeContext`](crate::BridgeContext) serializes every
//! managed-visible mutation: upcall dispatch, handle release, closure release and
//! run-state bookkeeping. It is reentrant on the owning thread, so a callable that
//! drops handles or calls back into a session while being dispatched does not
//! deadlock. [`ExecutionLock::allow_threads`] releases it completely around a
//! blocking engine call and restores the previous depth afterwards.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant, releasable lock guarding the managed side of the bridge
#[derive(Debug, Default)]
pub struct ExecutionLock {
    state: Mutex<LockState>,
    available: Condvar,
}

/// RAII guard for one level of [`ExecutionLock`] ownership
#[must_use = "the execution lock is released when the guard is dropped"]
pub struct ExecutionGuard<'a> {
    lock: &'a ExecutionLock,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, blocking while another thread owns it
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        self.take(1);
        ExecutionGuard { lock: self }
    }

    /// Whether the calling thread currently owns the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Current ownership depth of the calling thread (0 if not owner)
    pub fn depth(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.depth
        } else {
            0
        }
    }

    /// Run `f` with the lock fully released by the calling thread.
    ///
    /// If the caller does not own the lock, `f` simply runs. Otherwise every level
    /// of ownership is given up for the duration of `f` and reacquired afterwards,
    /// also when `f` panics.
    pub fn allow_threads<R>(&self, f: impl FnOnce() -> R) -> R {
        let saved = self.suspend();
        let _restore = Restore { lock: self, depth: saved };
        f()
    }

    fn take(&self, levels: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = levels;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += levels;
                    return;
                }
                Some(_) => self.available.wait(&mut state),
            }
        }
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.available.notify_one();
        }
    }

    fn suspend(&self) -> usize {
        let mut state = self.state.lock();
        if state.owner != Some(thread::current().id()) {
            return 0;
        }
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.available.notify_one();
        depth
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_one();
    }
}

struct Restore<'a> {
    lock: &'a ExecutionLock,
    depth: usize,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        if self.depth > 0 {
            self.lock.take(self.depth);
        }
    }
}
