//! Execution Context: run-scoped values and the per-step isolation boundary
use crate::config::Config;
use crate::error::StageError;
use crate::profile::CallSite;
use crate::runner::Engine;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe, Location};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::Span;

/// Opaque caller value shared by every stage of one run.
#[derive(Clone)]
pub struct RunContext(Arc<dyn Any + Send + Sync>);

impl RunContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunContext(..)")
    }
}

/// Isolation boundary for one step.
///
/// Everything registered through a scope reports failures to the same
/// step. Once the run has moved past that step the scope is inert: its
/// signals are discarded by the engine.
#[derive(Clone)]
pub(crate) struct StepScope {
    engine: Arc<Engine>,
    step: usize,
    span: Span,
}

impl StepScope {
    pub(crate) fn new(engine: Arc<Engine>, step: usize, span: Span) -> Self {
        Self { engine, step, span }
    }

    pub(crate) fn step(&self) -> usize {
        self.step
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn config(&self) -> &Config {
        self.engine.config()
    }

    pub(crate) fn handle(&self) -> &Handle {
        self.engine.handle()
    }

    pub(crate) fn run_context(&self) -> Option<&RunContext> {
        self.engine.run_context()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.engine.is_current(self.step)
    }

    pub(crate) fn succeed(&self, outputs: Vec<Value>) {
        self.engine.on_success(self.step, outputs);
    }

    pub(crate) fn raise(&self, err: StageError) {
        self.engine.on_error(self.step, err);
    }

    /// Re-raises on the next scheduler tick so the failing callback's
    /// caller is never re-entered.
    pub(crate) fn raise_deferred(&self, err: StageError) {
        let scope = self.clone();
        self.handle().spawn(async move { scope.raise(err) });
    }

    /// Runs `f` inside the boundary and returns whatever it failed with.
    pub(crate) fn capture<F>(&self, f: F) -> Option<StageError>
    where
        F: FnOnce() -> Result<(), StageError>,
    {
        let _entered = self.span.enter();
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(StageError::from_panic(payload)),
        }
    }

    /// Runs a wrapped callback; any failure goes back to this step.
    pub(crate) fn guard<F>(&self, f: F)
    where
        F: FnOnce() -> Result<(), StageError>,
    {
        if let Some(err) = self.capture(f) {
            self.raise_deferred(err);
        }
    }

    pub(crate) fn open_timing(&self, location: &'static Location<'static>) -> Option<usize> {
        let config = self.config();
        if !config.profiling {
            return None;
        }
        let site = CallSite::capture(location, &config.base_path);
        self.engine.open_callback(self.step, site)
    }

    pub(crate) fn close_timing(&self, timing: Option<usize>) {
        if let Some(index) = timing {
            self.engine.close_callback(self.step, index);
        }
    }
}
