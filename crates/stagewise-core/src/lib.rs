//! Stagewise Core: staged callback execution with per-step error isolation
//!
//! A run drives an ordered chain of stages (pre-stages, one target, then
//! post-stages) one step at a time on a tokio runtime. Each stage receives
//! its inputs, a [`Success`] handle and an error [`Toolkit`]. Failures
//! raised synchronously, or later through callbacks wrapped by the toolkit,
//! end the run; the completion callback fires exactly once either way.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use stagewise_core::{seq, stage, Pipeline};
//!
//! let load = stage(|inputs, success, error| {
//!     let name = inputs[0].as_str().ok_or_else(|| error.message("name must be a string"))?;
//!     success.call(vec![json!(name.len())]);
//!     Ok(())
//! });
//! let report = stage(|inputs, success, _| {
//!     success.call(vec![json!({ "name": inputs[0], "len": inputs[1] })]);
//!     Ok(())
//! });
//!
//! let completion = Pipeline::default()
//!     .run(seq([seq([load]), report.into()]), vec![json!("stagewise")])
//!     .await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod profile;
pub mod runner;
pub mod shape;
pub mod stage;
pub mod toolkit;

pub use config::{Config, ErrorClass, ProfileToggle};
pub use context::RunContext;
pub use error::{GenericError, RunnerError, StageError};
pub use pipeline::Pipeline;
pub use profile::{CallSite, CallbackTiming, Interval, ProfileRecord};
pub use runner::{Completion, Runner};
pub use shape::{seq, StageSpec, StageTriple};
pub use stage::{stage, Stage, StageFn, StageKind};
pub use toolkit::{Callback, NodeCallback, Success, Toolkit};

/// Engine version
pub const STAGEWISE_VERSION: &str = env!("CARGO_PKG_VERSION");
