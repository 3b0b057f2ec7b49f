//! Per-step timing records collected when profiling is enabled.
use crate::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::Location;
use std::path::Path;
use std::time::{Duration, Instant};

/// Where a callback was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    /// Relative to the configured base path when it is a prefix.
    pub file: String,
    pub line: u32,
}

impl CallSite {
    pub fn capture(location: &Location<'_>, base_path: &str) -> Self {
        let file = Path::new(location.file());
        let file = if base_path.is_empty() {
            file
        } else {
            file.strip_prefix(base_path).unwrap_or(file)
        };
        Self {
            file: file.to_string_lossy().into_owned(),
            line: location.line(),
        }
    }
}

/// Wall-clock begin/end plus monotonic elapsed time.
#[derive(Debug, Clone, Serialize)]
pub struct Interval {
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub elapsed: Option<Duration>,
    #[serde(skip)]
    started: Instant,
}

impl Interval {
    fn open() -> Self {
        Self {
            begin: Utc::now(),
            end: None,
            elapsed: None,
            started: Instant::now(),
        }
    }

    fn close(&mut self) {
        self.end = Some(Utc::now());
        self.elapsed = Some(self.started.elapsed());
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}

/// Timing of one callback wrapped through the step toolkit.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackTiming {
    pub location: Option<CallSite>,
    #[serde(flatten)]
    pub interval: Interval,
}

/// One record per executed step.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileRecord {
    pub step: usize,
    pub kind: StageKind,
    #[serde(flatten)]
    pub interval: Interval,
    pub times: Vec<CallbackTiming>,
}

impl ProfileRecord {
    pub fn elapsed(&self) -> Option<Duration> {
        self.interval.elapsed
    }
}

/// Profile log for one run.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    records: Vec<ProfileRecord>,
}

impl Recorder {
    pub(crate) fn open_step(&mut self, step: usize, kind: StageKind) {
        self.records.push(ProfileRecord {
            step,
            kind,
            interval: Interval::open(),
            times: Vec::new(),
        });
    }

    pub(crate) fn close_step(&mut self, step: usize) {
        if let Some(record) = self.record_mut(step) {
            record.interval.close();
        }
    }

    /// Returns the index of the new timing within the step's record.
    pub(crate) fn open_callback(
        &mut self,
        step: usize,
        location: Option<CallSite>,
    ) -> Option<usize> {
        let record = self.record_mut(step)?;
        record.times.push(CallbackTiming {
            location,
            interval: Interval::open(),
        });
        Some(record.times.len() - 1)
    }

    pub(crate) fn close_callback(&mut self, step: usize, index: usize) {
        if let Some(timing) = self
            .record_mut(step)
            .and_then(|record| record.times.get_mut(index))
        {
            timing.interval.close();
        }
    }

    pub(crate) fn take(&mut self) -> Vec<ProfileRecord> {
        std::mem::take(&mut self.records)
    }

    fn record_mut(&mut self, step: usize) -> Option<&mut ProfileRecord> {
        self.records.iter_mut().rev().find(|r| r.step == step)
    }
}
