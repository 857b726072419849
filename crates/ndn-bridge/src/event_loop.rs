//! Multi-session event loop
//!
//! Drives several sessions from one thread: wait for the nearest scheduled
//! deadline (capped), then give every session one non-blocking run pass.

use crate::error::BridgeResult;
use crate::session::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Longest single wait between passes
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

pub struct EventLoop {
    sessions: Vec<Arc<Session>>,
    running: Arc<AtomicBool>,
    max_wait: Duration,
}

/// Clonable handle that stops an [`EventLoop`] from any thread or upcall
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventLoop {
    pub fn new(sessions: impl IntoIterator<Item = Arc<Session>>) -> Self {
        Self {
            sessions: sessions.into_iter().collect(),
            running: Arc::new(AtomicBool::new(false)),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    /// Shortest wait reported by the sessions' scheduled operations
    pub fn run_scheduled(&self) -> BridgeResult<Duration> {
        let mut wait = self.max_wait;
        for session in &self.sessions {
            let micros = session.process_scheduled()?.max(0) as u64;
            wait = wait.min(Duration::from_micros(micros));
        }
        Ok(wait)
    }

    /// One iteration: wait unless output is pending, then run each session once
    pub fn run_once(&self) -> BridgeResult<()> {
        let mut output_pending = false;
        for session in &self.sessions {
            output_pending |= session.output_is_pending()?;
        }
        if !output_pending {
            let wait = self.run_scheduled()?;
            if !wait.is_zero() {
                thread::sleep(wait);
            }
        }
        for session in &self.sessions {
            session.run(Some(0))?;
        }
        Ok(())
    }

    /// Loop until stopped
    pub fn run(&self) -> BridgeResult<()> {
        self.running.store(true, Ordering::SeqCst);
        debug!(sessions = self.sessions.len(), "event loop started");
        while self.running.load(Ordering::SeqCst) {
            self.run_once()?;
        }
        debug!("event loop stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.running))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
