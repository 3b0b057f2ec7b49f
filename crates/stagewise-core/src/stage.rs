//! Stage Trait: the contract every pipeline step implements
use crate::error::StageError;
use crate::toolkit::{Success, Toolkit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One callback-style unit of work.
///
/// `run` is invoked exactly once per step. It must eventually call
/// `success` or route an error through `error`, either before returning
/// or later from work registered through the toolkit. Returning `Err`
/// or panicking fails the step immediately.
pub trait Stage: Send + Sync {
    /// Name used in logs.
    fn id(&self) -> &str {
        "anonymous"
    }

    fn run(&self, inputs: Vec<Value>, success: Success, error: Toolkit) -> Result<(), StageError>;
}

impl<F> Stage for F
where
    F: Fn(Vec<Value>, Success, Toolkit) -> Result<(), StageError> + Send + Sync,
{
    fn run(&self, inputs: Vec<Value>, success: Success, error: Toolkit) -> Result<(), StageError> {
        self(inputs, success, error)
    }
}

/// Shared handle to a stage.
pub type StageFn = Arc<dyn Stage>;

/// Wraps a closure as a [`StageFn`], pinning down its argument types.
pub fn stage<F>(f: F) -> StageFn
where
    F: Fn(Vec<Value>, Success, Toolkit) -> Result<(), StageError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Position of a stage in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Pre,
    Target,
    Post,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Target => write!(f, "target"),
            Self::Post => write!(f, "post"),
        }
    }
}
