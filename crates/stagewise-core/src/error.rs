//! Unified Error Model
use serde_json::Value;
use std::any::Any;
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error produced by an [`ErrorClass`](crate::config::ErrorClass) constructor.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error carried to the completion callback when a step fails.
#[derive(Error, Debug)]
pub enum StageError {
    /// Built through the step toolkit with the configured error class.
    #[error("{source}")]
    Raised {
        class: &'static str,
        code: Option<Value>,
        source: BoxError,
    },

    /// A value thrown verbatim.
    #[error("THROWN/{0}")]
    Thrown(Value),

    #[error("PANIC/{0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Converts a caught panic payload into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Error code attached by `Toolkit::coded`, if any.
    pub fn code(&self) -> Option<&Value> {
        match self {
            Self::Raised { code, .. } => code.as_ref(),
            _ => None,
        }
    }

    /// Name of the error class that built this error.
    pub fn class_name(&self) -> Option<&'static str> {
        match self {
            Self::Raised { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Recovers the concrete error built by the configured error class.
    pub fn downcast_ref<E: StdError + Send + Sync + 'static>(&self) -> Option<&E> {
        match self {
            Self::Raised { source, .. } => source.downcast_ref::<E>(),
            Self::Other(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Default error class: carries the formatted message and nothing else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GenericError(pub String);

impl From<String> for GenericError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Failures of the runner itself, never delivered through `done`.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Returned synchronously when the stage list cannot be normalized.
    #[error("SHAPE/{0}")]
    InvalidShape(String),

    /// Returned synchronously by `exec` outside a tokio runtime.
    #[error("RUNTIME/exec must be called from within a tokio runtime")]
    NoRuntime,

    /// Only from the async `Runner::run`, when the run was abandoned
    /// before completing: every step handle dropped, or the runtime shut
    /// down.
    #[error("RUNTIME/completion dropped before delivery")]
    Dropped,
}
