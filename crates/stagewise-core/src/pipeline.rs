//! Pipeline facade: builds runners from a default configuration.
use crate::config::Config;
use crate::error::RunnerError;
use crate::runner::{Completion, Runner};
use crate::shape::StageSpec;
use serde_json::Value;

/// Entry point holding the defaults every runner starts from.
///
/// Runners copy the configuration when they are built, so later changes
/// here never reach a runner that already exists.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Defaults read from `STAGEWISE_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn runner(&self, spec: impl Into<StageSpec>) -> Result<Runner, RunnerError> {
        Runner::from_spec(spec.into(), self.config.clone())
    }

    /// Builds a runner and starts it in one call.
    pub fn exec<F>(
        &self,
        spec: impl Into<StageSpec>,
        inputs: Vec<Value>,
        done: F,
    ) -> Result<(), RunnerError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.runner(spec)?.exec(inputs, done)
    }

    pub async fn run(
        &self,
        spec: impl Into<StageSpec>,
        inputs: Vec<Value>,
    ) -> Result<Completion, RunnerError> {
        self.runner(spec)?.run(inputs).await
    }
}
