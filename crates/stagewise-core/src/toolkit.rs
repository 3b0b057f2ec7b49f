//! Step-scoped completion handles and the error toolkit handed to stages.
//!
//! Every handle here is bound to the step that created it. Handles from a
//! step the run has already moved past are inert.
use crate::context::StepScope;
use crate::error::StageError;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use tracing::Instrument;

/// Completes the step with the given outputs. Only the first call counts.
#[derive(Clone)]
pub struct Success {
    scope: StepScope,
}

impl Success {
    pub(crate) fn new(scope: StepScope) -> Self {
        Self { scope }
    }

    pub fn call(&self, outputs: Vec<Value>) {
        self.scope.succeed(outputs);
    }

    pub fn step(&self) -> usize {
        self.scope.step()
    }
}

impl fmt::Debug for Success {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Success").field("step", &self.step()).finish()
    }
}

/// Callback that passes every argument through to the wrapped function.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<dyn Fn(Vec<Value>) + Send + Sync>,
}

impl Callback {
    pub fn call(&self, args: Vec<Value>) {
        (self.inner)(args)
    }
}

/// Error-first callback: `Err` fails the step, `Ok` carries the arguments.
#[derive(Clone)]
pub struct NodeCallback {
    inner: Arc<dyn Fn(Result<Vec<Value>, StageError>) + Send + Sync>,
}

impl NodeCallback {
    pub fn call(&self, result: Result<Vec<Value>, StageError>) {
        (self.inner)(result)
    }

    pub fn ok(&self, args: Vec<Value>) {
        self.call(Ok(args))
    }

    pub fn err(&self, err: impl Into<StageError>) {
        self.call(Err(err.into()))
    }
}

/// Error helpers for one step.
///
/// The `message`, `coded` and `value` forms build the error; the stage
/// returns it (`return Err(error.message(..))`). The wrapping forms
/// (`intercept`, `or_out`, `or_output`, `wrap`, `spawn`) route anything
/// their callback fails with to this step, however late it runs.
#[derive(Clone)]
pub struct Toolkit {
    scope: StepScope,
    success: Success,
}

impl Toolkit {
    pub(crate) fn new(scope: StepScope, success: Success) -> Self {
        Self { scope, success }
    }

    pub fn step(&self) -> usize {
        self.scope.step()
    }

    /// False once the run has moved past this step.
    pub fn is_live(&self) -> bool {
        self.scope.is_live()
    }

    pub fn run_context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.scope.run_context().and_then(|ctx| ctx.downcast::<T>())
    }

    /// Wraps `f` as an error-first callback. `Err` fails the step; `Ok`
    /// arguments are handed to `f`.
    #[track_caller]
    pub fn intercept<F>(&self, f: F) -> NodeCallback
    where
        F: Fn(Vec<Value>) -> Result<(), StageError> + Send + Sync + 'static,
    {
        self.node(Location::caller(), f)
    }

    /// Error-first callback that completes the step with `outputs`.
    #[track_caller]
    pub fn or_out(&self, outputs: Vec<Value>) -> NodeCallback {
        let success = self.success.clone();
        self.node(Location::caller(), move |_| {
            success.call(outputs.clone());
            Ok(())
        })
    }

    /// Error-first callback that completes the step with its own
    /// arguments, or only the first `limit` of them.
    #[track_caller]
    pub fn or_output(&self, limit: Option<usize>) -> NodeCallback {
        let success = self.success.clone();
        self.node(Location::caller(), move |mut args| {
            if let Some(n) = limit {
                args.truncate(n);
            }
            success.call(args);
            Ok(())
        })
    }

    /// Like `intercept`, but every argument reaches `f` untouched.
    #[track_caller]
    pub fn wrap<F>(&self, f: F) -> Callback
    where
        F: Fn(Vec<Value>) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let timing = self.scope.open_timing(Location::caller());
        let scope = self.scope.clone();
        Callback {
            inner: Arc::new(move |args| {
                scope.close_timing(timing);
                scope.guard(|| f(args));
            }),
        }
    }

    /// Spawns `future` on the run's runtime. An `Err` or a panic fails
    /// this step.
    #[track_caller]
    pub fn spawn<Fut>(&self, future: Fut)
    where
        Fut: Future<Output = Result<(), StageError>> + Send + 'static,
    {
        let timing = self.scope.open_timing(Location::caller());
        let scope = self.scope.clone();
        let handle = self.scope.handle().clone();
        let task = handle.spawn(future.instrument(self.scope.span().clone()));
        handle.spawn(async move {
            let outcome = task.await;
            scope.close_timing(timing);
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => scope.raise(err),
                Err(join) if join.is_panic() => {
                    scope.raise(StageError::from_panic(join.into_panic()))
                }
                Err(_) => {}
            }
        });
    }

    /// Error of the configured class.
    ///
    /// With error codes enabled this form is not available and the message
    /// itself is thrown as a plain value.
    pub fn message(&self, message: impl Into<String>) -> StageError {
        let message = message.into();
        let config = self.scope.config();
        if config.error_codes {
            return StageError::Thrown(Value::String(message));
        }
        StageError::Raised {
            class: config.error_class.name(),
            code: None,
            source: config.error_class.construct(message),
        }
    }

    /// Error of the configured class carrying `code`.
    ///
    /// With error codes disabled the code is thrown as a plain value, a
    /// string code included. It is never formatted together with `message`
    /// into an error of the configured class.
    pub fn coded(&self, code: impl Into<Value>, message: impl Into<String>) -> StageError {
        let config = self.scope.config();
        if !config.error_codes {
            return StageError::Thrown(code.into());
        }
        StageError::Raised {
            class: config.error_class.name(),
            code: Some(code.into()),
            source: config.error_class.construct(message.into()),
        }
    }

    pub fn value(&self, value: impl Into<Value>) -> StageError {
        StageError::Thrown(value.into())
    }

    /// Fails the step right away, from wherever the toolkit was carried.
    pub fn raise(&self, err: impl Into<StageError>) {
        self.scope.raise(err.into());
    }

    fn node<F>(&self, location: &'static Location<'static>, f: F) -> NodeCallback
    where
        F: Fn(Vec<Value>) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let timing = self.scope.open_timing(location);
        let scope = self.scope.clone();
        NodeCallback {
            inner: Arc::new(move |result| {
                scope.close_timing(timing);
                scope.guard(|| result.and_then(|args| f(args)));
            }),
        }
    }
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolkit").field("step", &self.step()).finish()
    }
}
