//! Managed session facade
//!
//! A [`Session`] owns one engine session handle and exposes the engine's
//! operations with argument validation, error conversion and the run-loop
//! guards. Managed calls on one session are serialized by a per-session lock,
//! except while the session's own `run` is executing: callables invoked from
//! that run may call back into the session without deadlocking.

use crate::closure::{self, Closure};
use crate::context::BridgeContext;
use crate::engine::SessionPtr;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{CharBuf, Handle, HandleTag};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::os::raw::c_int;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Session {
    ctx: Arc<BridgeContext>,
    handle: Handle,
    handle_lock: Mutex<()>,
}

impl Session {
    /// Create a session and connect it
    pub fn new(ctx: &Arc<BridgeContext>) -> BridgeResult<Session> {
        let session = Self::create(ctx)?;
        session.connect()?;
        Ok(session)
    }

    /// Create a session without connecting
    pub fn create(ctx: &Arc<BridgeContext>) -> BridgeResult<Session> {
        let handle = Handle::new_session(ctx)?;
        let ptr = handle.session_ptr()?;
        ctx.engine().set_run_timeout(ptr, ctx.config().run_timeout_ms());
        Ok(Session {
            ctx: Arc::clone(ctx),
            handle,
            handle_lock: Mutex::new(()),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    fn ptr(&self) -> BridgeResult<SessionPtr> {
        self.handle.session_ptr()
    }

    /// Whether this session's blocking run call is in progress
    pub fn is_run_executing(&self) -> bool {
        self.ptr()
            .map(|ptr| self.ctx.run_state().is_running(ptr))
            .unwrap_or(false)
    }

    /// Take the handle lock with the execution lock suspended while waiting
    fn lock_handle(&self) -> MutexGuard<'_, ()> {
        self.ctx.execution_lock().allow_threads(|| self.handle_lock.lock())
    }

    fn lock_unless_running(&self) -> Option<MutexGuard<'_, ()>> {
        if self.is_run_executing() {
            None
        } else {
            Some(self.lock_handle())
        }
    }

    fn ensure_not_running(&self, operation: &'static str) -> BridgeResult<()> {
        if self.is_run_executing() {
            Err(BridgeError::RunInProgress { operation })
        } else {
            Ok(())
        }
    }

    fn check(&self, operation: &'static str, session: SessionPtr, status: c_int) -> BridgeResult<c_int> {
        if status < 0 {
            Err(BridgeError::native(operation, self.ctx.engine().last_error(session)))
        } else {
            Ok(status)
        }
    }

    /// Connect to the daemon, returning the connection descriptor
    pub fn connect(&self) -> BridgeResult<i32> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        let status = self.ctx.engine().connect(session);
        self.check("connect", session, status)
    }

    pub fn disconnect(&self) -> BridgeResult<()> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        let status = self.ctx.engine().disconnect(session);
        self.check("disconnect", session, status).map(|_| ())
    }

    /// Connection descriptor, negative when disconnected
    pub fn fileno(&self) -> i32 {
        self.ptr()
            .map(|session| self.ctx.engine().connection_fd(session))
            .unwrap_or(-1)
    }

    /// Process due timers; returns microseconds until the next deadline
    pub fn process_scheduled(&self) -> BridgeResult<i32> {
        self.ensure_not_running("process_scheduled")?;
        Ok(self.ctx.engine().process_scheduled_operations(self.ptr()?))
    }

    pub fn output_is_pending(&self) -> BridgeResult<bool> {
        self.ensure_not_running("output_is_pending")?;
        Ok(self.ctx.engine().output_is_pending(self.ptr()?))
    }

    /// Pump the engine, delivering upcalls on this thread.
    ///
    /// `None` uses the session's run timeout. The execution lock is released
    /// for the duration of the engine call.
    pub fn run(&self, timeout_ms: Option<i32>) -> BridgeResult<()> {
        self.ensure_not_running("run")?;
        let _guard = self.lock_handle();
        let session = self.ptr()?;
        let engine = self.ctx.engine();

        let status = {
            let _record = self.ctx.run_state().enter(session)?;
            debug!(?timeout_ms, "entering run");
            let status = self
                .ctx
                .execution_lock()
                .allow_threads(|| engine.run(session, timeout_ms.unwrap_or(-1)));
            debug!(status, "run returned");
            status
        };
        self.check("run", session, status).map(|_| ())
    }

    /// Set the timeout used by later `run(None)` calls; returns the previous one
    pub fn set_run_timeout(&self, timeout_ms: i32) -> BridgeResult<i32> {
        let _guard = self.lock_unless_running();
        Ok(self.ctx.engine().set_run_timeout(self.ptr()?, timeout_ms))
    }

    /// Express an interest for `name`; `closure` receives the content or the
    /// timeout. The returned handle may be dropped: the registration stays
    /// alive until the closure's final upcall.
    pub fn express_interest(
        &self,
        name: &Handle,
        closure: &Arc<dyn Closure>,
        template: Option<&Handle>,
    ) -> BridgeResult<Handle> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        name.get(HandleTag::Name)?;
        if let Some(template) = template {
            template.get(HandleTag::Interest)?;
        }
        let template = template.map(Handle::bytes).transpose()?;

        let registration = closure::register(&self.ctx, closure)?;
        let status = self.ctx.engine().express_interest(
            session,
            name.bytes()?,
            registration.closure_ptr()?,
            template,
        );
        if status < 0 {
            warn!(status, "engine rejected interest");
            closure::abandon(&registration)?;
            return Err(BridgeError::native(
                "express_interest",
                self.ctx.engine().last_error(session),
            ));
        }
        Ok(registration)
    }

    /// Register `closure` for interests under `name`.
    ///
    /// `flags` defaults to the configured forwarding flags. A closure previously
    /// registered for the same name receives its final upcall.
    pub fn set_interest_filter(
        &self,
        name: &Handle,
        closure: &Arc<dyn Closure>,
        flags: Option<i32>,
    ) -> BridgeResult<Handle> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        name.get(HandleTag::Name)?;
        let flags = flags.unwrap_or_else(|| self.ctx.config().interest_filter_flags());

        let registration = closure::register(&self.ctx, closure)?;
        let status = self.ctx.engine().set_interest_filter(
            session,
            name.bytes()?,
            Some(registration.closure_ptr()?),
            flags,
        );
        if status < 0 {
            warn!(status, "engine rejected interest filter");
            closure::abandon(&registration)?;
            return Err(BridgeError::native(
                "set_interest_filter",
                self.ctx.engine().last_error(session),
            ));
        }
        Ok(registration)
    }

    /// Remove the registration for `name`; its closure receives the final upcall
    pub fn clear_interest_filter(&self, name: &Handle) -> BridgeResult<()> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        name.get(HandleTag::Name)?;
        let status = self
            .ctx
            .engine()
            .set_interest_filter(session, name.bytes()?, None, 0);
        self.check("set_interest_filter", session, status).map(|_| ())
    }

    /// Blocking fetch of one content object.
    ///
    /// `Ok(None)` means the fetch timed out. `timeout_ms` defaults to the
    /// configured get timeout.
    pub fn get(
        &self,
        name: &Handle,
        template: Option<&Handle>,
        timeout_ms: Option<i32>,
    ) -> BridgeResult<Option<Handle>> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        name.get(HandleTag::Name)?;
        if let Some(template) = template {
            template.get(HandleTag::Interest)?;
        }
        let template = template.map(Handle::bytes).transpose()?;
        let name = name.bytes()?;
        let timeout = timeout_ms.unwrap_or_else(|| self.ctx.config().get_timeout_ms());
        let engine = self.ctx.engine();

        let mut out = CharBuf::new();
        let status = self
            .ctx
            .execution_lock()
            .allow_threads(|| engine.get(session, name, template, timeout, &mut out));
        if status < 0 {
            return match engine.last_error(session) {
                0 => Ok(None),
                code => Err(BridgeError::native("get", code)),
            };
        }

        let content = Handle::from_charbuf(&self.ctx, HandleTag::ContentObject, out)?;
        content.parsed_content()?;
        Ok(Some(content))
    }

    /// Publish a content object
    pub fn put(&self, content: &Handle) -> BridgeResult<i32> {
        let _guard = self.lock_unless_running();
        let session = self.ptr()?;
        content.get(HandleTag::ContentObject)?;
        let status = self.ctx.engine().put(session, content.bytes()?);
        self.check("put", session, status)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("fd", &self.fileno())
            .field("running", &self.is_run_executing())
            .finish()
    }
}
