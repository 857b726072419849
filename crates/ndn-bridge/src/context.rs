//! Bridge context
//!
//! Everything that was process-global in a classic binding lives here: the
//! engine, the execution lock, the run-state tracker, per-tag handle accounting,
//! the failure reporter and the loaded configuration. Handles and sessions keep
//! the context alive through an `Arc`.

use crate::engine::NativeEngine;
use crate::handle::HandleRegistry;
use crate::lock::ExecutionLock;
use crate::report::{ErrorReporter, TracingReporter};
use crate::run_state::RunStateTracker;
use ndn_bridge_config::BridgeConfig;
use std::fmt;
use std::sync::Arc;

pub struct BridgeContext {
    engine: Arc<dyn NativeEngine>,
    lock: ExecutionLock,
    run_state: RunStateTracker,
    registry: HandleRegistry,
    reporter: Arc<dyn ErrorReporter>,
    config: BridgeConfig,
}

impl BridgeContext {
    /// Context with default reporter and configuration
    pub fn new(engine: Arc<dyn NativeEngine>) -> Arc<Self> {
        Self::builder(engine).build()
    }

    pub fn builder(engine: Arc<dyn NativeEngine>) -> BridgeContextBuilder {
        BridgeContextBuilder {
            engine,
            reporter: None,
            config: None,
        }
    }

    pub fn engine(&self) -> &dyn NativeEngine {
        self.engine.as_ref()
    }

    pub fn execution_lock(&self) -> &ExecutionLock {
        &self.lock
    }

    pub fn run_state(&self) -> &RunStateTracker {
        &self.run_state
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn reporter(&self) -> &dyn ErrorReporter {
        self.reporter.as_ref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("registry", &self.registry)
            .field("running", &self.run_state.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub struct BridgeContextBuilder {
    engine: Arc<dyn NativeEngine>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    config: Option<BridgeConfig>,
}

impl BridgeContextBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Arc<BridgeContext> {
        Arc::new(BridgeContext {
            engine: self.engine,
            lock: ExecutionLock::new(),
            run_state: RunStateTracker::new(),
            registry: HandleRegistry::new(),
            reporter: self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
            config: self.config.unwrap_or_default(),
        })
    }
}
