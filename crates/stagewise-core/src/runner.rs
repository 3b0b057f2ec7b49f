//! Pipeline Runner: drives pre-stages, target and post-stages one step at a time
use crate::config::{Config, ErrorClass, ProfileToggle};
use crate::context::{RunContext, StepScope};
use crate::error::{RunnerError, StageError};
use crate::profile::{CallSite, ProfileRecord, Recorder};
use crate::shape::{StageSpec, StageTriple};
use crate::stage::StageKind;
use crate::toolkit::{Success, Toolkit};
use serde_json::Value;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, debug_span, trace, Span};
use uuid::Uuid;

type Done = Box<dyn FnOnce(Completion) + Send + 'static>;

/// What the run does once the current step is settled.
enum Continuation {
    Step,
    Deliver(Done, Completion),
}

/// What the completion callback receives.
#[derive(Debug)]
pub struct Completion {
    pub result: Result<Vec<Value>, StageError>,
    /// Present only when profiling was enabled for the run.
    pub profile: Option<Vec<ProfileRecord>>,
}

impl Completion {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&StageError> {
        self.result.as_ref().err()
    }

    /// Final outputs; empty when the run failed.
    pub fn outputs(&self) -> &[Value] {
        match &self.result {
            Ok(outputs) => outputs,
            Err(_) => &[],
        }
    }

    pub fn into_result(self) -> Result<Vec<Value>, StageError> {
        self.result
    }
}

/// Configured, not yet started run over a stage triple.
///
/// `exec` consumes the runner, so each runner drives exactly one run.
pub struct Runner {
    triple: Arc<StageTriple>,
    config: Config,
    run_context: Option<RunContext>,
}

impl Runner {
    pub fn new(triple: StageTriple, config: Config) -> Self {
        Self {
            triple: Arc::new(triple),
            config,
            run_context: None,
        }
    }

    pub fn from_spec(spec: StageSpec, config: Config) -> Result<Self, RunnerError> {
        Ok(Self::new(StageTriple::from_spec(spec)?, config))
    }

    /// `true`/`false` toggles profiling; a string sets the base path for
    /// recorded call sites and turns profiling on.
    pub fn profile(mut self, toggle: impl Into<ProfileToggle>) -> Self {
        self.config.apply_profile(toggle.into());
        self
    }

    pub fn error_class(mut self, class: ErrorClass) -> Self {
        self.config.error_class = class;
        self
    }

    pub fn error_codes(mut self, enabled: bool) -> Self {
        self.config.error_codes = enabled;
        self
    }

    pub fn run_context<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.run_context = Some(RunContext::new(value));
        self
    }

    /// Like [`run_context`](Self::run_context), for a value the caller keeps
    /// a handle to.
    pub fn shared_run_context<T: Any + Send + Sync>(mut self, value: Arc<T>) -> Self {
        self.run_context = Some(RunContext::from_arc(value));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the run on the current tokio runtime.
    ///
    /// The first step runs on a later tick, never on this call stack.
    /// `done` is invoked exactly once, inside the tracing span that was
    /// current when `exec` was called.
    pub fn exec<F>(self, inputs: Vec<Value>, done: F) -> Result<(), RunnerError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| RunnerError::NoRuntime)?;
        let caller = Span::current();
        let run_id = Uuid::new_v4();
        let span = debug_span!(
            parent: &caller,
            "run",
            run_id = %run_id,
            stages = self.triple.len()
        );
        debug!(
            parent: &span,
            inputs = inputs.len(),
            profiling = self.config.profiling,
            "exec"
        );

        let engine = Arc::new(Engine {
            triple: self.triple,
            config: self.config,
            run_context: self.run_context,
            inputs,
            handle,
            caller,
            span,
            state: Mutex::new(ExecutionState {
                step: 0,
                filter_outputs: Vec::new(),
                post_filter_input: Vec::new(),
                ended: false,
                running: false,
                pending: None,
                done: Some(Box::new(done)),
                profile: Recorder::default(),
            }),
        });
        engine.proceed(Continuation::Step);
        Ok(())
    }

    /// Async form of [`exec`](Self::exec).
    pub async fn run(self, inputs: Vec<Value>) -> Result<Completion, RunnerError> {
        let (tx, rx) = oneshot::channel();
        self.exec(inputs, move |completion| {
            let _ = tx.send(completion);
        })?;
        rx.await.map_err(|_| RunnerError::Dropped)
    }
}

struct ExecutionState {
    step: usize,
    /// Outputs of every pre-stage, in stage order.
    filter_outputs: Vec<Value>,
    /// Output of the last completed stage once post-stages begin.
    post_filter_input: Vec<Value>,
    ended: bool,
    /// Set while a stage body is on the stack.
    running: bool,
    /// Continuation held back until the running stage body returns.
    pending: Option<Continuation>,
    done: Option<Done>,
    profile: Recorder,
}

/// Shared state of one run. Step scopes hold it; nothing else does.
pub(crate) struct Engine {
    triple: Arc<StageTriple>,
    config: Config,
    run_context: Option<RunContext>,
    inputs: Vec<Value>,
    handle: Handle,
    caller: Span,
    span: Span,
    state: Mutex<ExecutionState>,
}

impl Engine {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn run_context(&self) -> Option<&RunContext> {
        self.run_context.as_ref()
    }

    pub(crate) fn is_current(&self, step: usize) -> bool {
        let state = self.state();
        !state.ended && state.step == step
    }

    pub(crate) fn open_callback(&self, step: usize, site: CallSite) -> Option<usize> {
        self.state().profile.open_callback(step, Some(site))
    }

    pub(crate) fn close_callback(&self, step: usize, index: usize) {
        self.state().profile.close_callback(step, index);
    }

    fn state(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules `next` on a later tick, or parks it while a stage body is
    /// still running so no two stages ever overlap.
    fn proceed(self: &Arc<Self>, next: Continuation) {
        {
            let mut state = self.state();
            if state.running {
                state.pending = Some(next);
                return;
            }
        }
        self.dispatch(next);
    }

    fn dispatch(self: &Arc<Self>, next: Continuation) {
        match next {
            Continuation::Step => {
                let engine = Arc::clone(self);
                self.handle.spawn(async move { engine.do_step() });
            }
            Continuation::Deliver(done, completion) => {
                let caller = self.caller.clone();
                let span = self.span.clone();
                self.handle.spawn(async move {
                    debug!(parent: &span, ok = completion.is_ok(), "run complete");
                    caller.in_scope(|| done(completion));
                });
            }
        }
    }

    fn do_step(self: &Arc<Self>) {
        let (step, kind, args) = {
            let mut state = self.state();
            if state.ended {
                return;
            }
            let step = state.step;
            let Some(kind) = self.triple.kind_of(step) else {
                return;
            };
            let args = match kind {
                StageKind::Pre => self.inputs.clone(),
                StageKind::Target => self
                    .inputs
                    .iter()
                    .chain(state.filter_outputs.iter())
                    .cloned()
                    .collect(),
                StageKind::Post => std::mem::take(&mut state.post_filter_input),
            };
            if self.config.profiling {
                state.profile.open_step(step, kind);
            }
            state.running = true;
            (step, kind, args)
        };

        let Some(stage) = self.triple.stage_at(step).cloned() else {
            self.state().running = false;
            return;
        };
        let span = debug_span!(parent: &self.span, "step", step, kind = %kind, stage = stage.id());
        debug!(parent: &span, args = args.len(), "step start");

        let scope = StepScope::new(Arc::clone(self), step, span);
        let success = Success::new(scope.clone());
        let toolkit = Toolkit::new(scope.clone(), success.clone());
        if let Some(err) = scope.capture(|| stage.run(args, success, toolkit)) {
            self.on_error(step, err);
        }

        let pending = {
            let mut state = self.state();
            state.running = false;
            state.pending.take()
        };
        if let Some(next) = pending {
            self.dispatch(next);
        }
    }

    pub(crate) fn on_error(self: &Arc<Self>, step: usize, err: StageError) {
        {
            let mut state = self.state();
            if state.ended || state.step != step {
                trace!(parent: &self.span, step, current = state.step, "stale error discarded");
                return;
            }
            state.step += 1;
            if self.config.profiling {
                state.profile.close_step(step);
            }
        }
        debug!(parent: &self.span, step, error = %err, "step failed");
        self.finish(Err(err));
    }

    pub(crate) fn on_success(self: &Arc<Self>, step: usize, data: Vec<Value>) {
        let last = {
            let mut state = self.state();
            if state.ended || state.step != step {
                trace!(parent: &self.span, step, current = state.step, "stale success discarded");
                return;
            }
            state.step += 1;
            if self.config.profiling {
                state.profile.close_step(step);
            }
            debug!(parent: &self.span, step, outputs = data.len(), "step succeeded");

            if step < self.triple.pre_len() {
                state.filter_outputs.extend(data);
                None
            } else if step < self.triple.pre_len() + self.triple.post_len() {
                state.post_filter_input = data;
                None
            } else {
                Some(data)
            }
        };

        match last {
            None => self.proceed(Continuation::Step),
            Some(outputs) => self.finish(Ok(outputs)),
        }
    }

    fn finish(self: &Arc<Self>, result: Result<Vec<Value>, StageError>) {
        let (done, profile) = {
            let mut state = self.state();
            if state.ended {
                return;
            }
            state.ended = true;
            state.filter_outputs.clear();
            state.post_filter_input.clear();
            let profile = self.config.profiling.then(|| state.profile.take());
            (state.done.take(), profile)
        };
        let Some(done) = done else {
            return;
        };
        self.proceed(Continuation::Deliver(done, Completion { result, profile }));
    }
}
