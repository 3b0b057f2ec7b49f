//! Normalizes the accepted stage layouts into a canonical triple.
//!
//! Shapes are tried in this order:
//!
//! 1. a bare stage: `([], stage, [])`
//! 2. a sequence made only of bare stages: all but the last are pre-stages,
//!    the last is the target
//! 3. `[Seq, Stage]`: `(pre, target, [])`
//! 4. `[Stage, Seq]`: `([], target, post)`
//! 5. `[Seq, Stage, Seq]`: `(pre, target, post)`
//!
//! Anything else, including an empty sequence or a sequence nested inside a
//! pre/post list, is rejected with [`RunnerError::InvalidShape`].
use crate::error::RunnerError;
use crate::stage::{StageFn, StageKind};

/// Caller-facing description of a pipeline.
#[derive(Clone)]
pub enum StageSpec {
    Stage(StageFn),
    Seq(Vec<StageSpec>),
}

impl From<StageFn> for StageSpec {
    fn from(stage: StageFn) -> Self {
        Self::Stage(stage)
    }
}

impl From<Vec<StageSpec>> for StageSpec {
    fn from(entries: Vec<StageSpec>) -> Self {
        Self::Seq(entries)
    }
}

impl From<Vec<StageFn>> for StageSpec {
    fn from(stages: Vec<StageFn>) -> Self {
        Self::Seq(stages.into_iter().map(Self::Stage).collect())
    }
}

/// Shorthand for a nested sequence.
pub fn seq<I>(entries: I) -> StageSpec
where
    I: IntoIterator,
    I::Item: Into<StageSpec>,
{
    StageSpec::Seq(entries.into_iter().map(Into::into).collect())
}

/// Canonical, immutable stage layout.
#[derive(Clone)]
pub struct StageTriple {
    pre: Vec<StageFn>,
    target: StageFn,
    post: Vec<StageFn>,
}

impl StageTriple {
    pub fn new(pre: Vec<StageFn>, target: StageFn, post: Vec<StageFn>) -> Self {
        Self { pre, target, post }
    }

    pub fn from_spec(spec: StageSpec) -> Result<Self, RunnerError> {
        let entries = match spec {
            StageSpec::Stage(target) => return Ok(Self::new(Vec::new(), target, Vec::new())),
            StageSpec::Seq(entries) => entries,
        };

        if entries.is_empty() {
            return Err(RunnerError::InvalidShape("empty stage sequence".to_string()));
        }

        if entries.iter().all(|e| matches!(e, StageSpec::Stage(_))) {
            let mut stages = flatten(entries, "flat sequence")?;
            let target = stages.pop().ok_or_else(|| {
                RunnerError::InvalidShape("empty stage sequence".to_string())
            })?;
            return Ok(Self::new(stages, target, Vec::new()));
        }

        let mut iter = entries.into_iter();
        match (iter.next(), iter.next(), iter.next(), iter.next()) {
            (Some(StageSpec::Seq(pre)), Some(StageSpec::Stage(target)), None, None) => {
                Ok(Self::new(flatten(pre, "pre-stages")?, target, Vec::new()))
            }
            (Some(StageSpec::Stage(target)), Some(StageSpec::Seq(post)), None, None) => {
                Ok(Self::new(Vec::new(), target, flatten(post, "post-stages")?))
            }
            (
                Some(StageSpec::Seq(pre)),
                Some(StageSpec::Stage(target)),
                Some(StageSpec::Seq(post)),
                None,
            ) => Ok(Self::new(
                flatten(pre, "pre-stages")?,
                target,
                flatten(post, "post-stages")?,
            )),
            _ => Err(RunnerError::InvalidShape(
                "expected stage, [pre, target], [target, post], [pre, target, post] or a flat list"
                    .to_string(),
            )),
        }
    }

    /// Total number of steps in a run.
    pub fn len(&self) -> usize {
        self.pre.len() + 1 + self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn pre_len(&self) -> usize {
        self.pre.len()
    }

    pub fn post_len(&self) -> usize {
        self.post.len()
    }

    pub fn kind_of(&self, step: usize) -> Option<StageKind> {
        let pre = self.pre.len();
        if step < pre {
            Some(StageKind::Pre)
        } else if step == pre {
            Some(StageKind::Target)
        } else if step < self.len() {
            Some(StageKind::Post)
        } else {
            None
        }
    }

    pub fn stage_at(&self, step: usize) -> Option<&StageFn> {
        let pre = self.pre.len();
        match self.kind_of(step)? {
            StageKind::Pre => self.pre.get(step),
            StageKind::Target => Some(&self.target),
            StageKind::Post => self.post.get(step - pre - 1),
        }
    }
}

fn flatten(entries: Vec<StageSpec>, what: &str) -> Result<Vec<StageFn>, RunnerError> {
    entries
        .into_iter()
        .map(|entry| match entry {
            StageSpec::Stage(stage) => Ok(stage),
            StageSpec::Seq(_) => Err(RunnerError::InvalidShape(format!(
                "{} may not contain nested sequences",
                what
            ))),
        })
        .collect()
}
