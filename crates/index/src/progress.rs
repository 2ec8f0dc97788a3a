//! Build progress reporting.
//!
//! # Event Ordering
//!
//! For a successful build the events arrive in this order:
//!
//! 1. One event per [`Job`] as it begins, with `progress == 0.0`, in step
//!    order from [`Job::Load`] to [`Job::Done`].
//! 2. Between those, any number of updates for the current job. Within a job
//!    `progress` never decreases and stays in `[0.0, 1.0]`.
//! 3. [`Job::Done`] last.
//!
//! A failed build stops emitting at the point of failure.

use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A phase of the build, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    Load,
    Sort,
    SaveAuthor,
    SaveSeries,
    SaveTitle,
    SaveGenre,
    SaveOthers,
    Optimize,
    Stats,
    Done,
}

impl Job {
    pub const STEP_COUNT: u32 = 10;

    /// One-based position of the job in the pipeline.
    pub fn step(&self) -> u32 {
        match self {
            Job::Load => 1,
            Job::Sort => 2,
            Job::SaveAuthor => 3,
            Job::SaveSeries => 4,
            Job::SaveTitle => 5,
            Job::SaveGenre => 6,
            Job::SaveOthers => 7,
            Job::Optimize => 8,
            Job::Stats => 9,
            Job::Done => 10,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Job::Load => "loading records",
            Job::Sort => "sorting indices",
            Job::SaveAuthor => "saving author index",
            Job::SaveSeries => "saving series index",
            Job::SaveTitle => "saving title index",
            Job::SaveGenre => "saving genre index",
            Job::SaveOthers => "saving remaining indices",
            Job::Optimize => "optimizing",
            Job::Stats => "counting statistics",
            Job::Done => "done",
        }
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub step: u32,
    pub step_count: u32,
    pub job: Job,
    pub progress: f64,
    /// Records read from the source so far, counting filtered ones.
    pub records_loaded: Option<u64>,
}

/// Receiver of [`ProgressEvent`]s.
///
/// Implemented for any `FnMut(ProgressEvent) + Send` closure, so a channel
/// sender can be plugged in with `|event| { tx.send(event).ok(); }`.
pub trait ProgressSink: Send {
    fn report(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent) + Send,
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// A sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

/// Tracks the current job and enforces monotonic progress before forwarding
/// to the sink.
pub(crate) struct Progress<'a> {
    sink: &'a mut dyn ProgressSink,
    job: Job,
    progress: f64,
    records_loaded: Option<u64>,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            sink,
            job: Job::Load,
            progress: 0.0,
            records_loaded: None,
        }
    }

    pub(crate) fn begin(&mut self, job: Job) {
        debug_assert!(job.step() >= self.job.step(), "jobs must begin in pipeline order");
        self.job = job;
        self.progress = 0.0;
        self.emit();
    }

    /// Report progress for the current job. Values below the last reported
    /// one are ignored.
    pub(crate) fn set(&mut self, progress: f64) {
        let progress = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
        if progress > self.progress {
            self.progress = progress;
            self.emit();
        }
    }

    pub(crate) fn records_loaded(&mut self, records: u64) {
        self.records_loaded = Some(records);
        self.emit();
    }

    /// Progress reporter mapping `[0, 1]` onto `[from, to]` of the current
    /// job.
    pub(crate) fn span(&mut self, from: f64, to: f64) -> Span<'_, 'a> {
        Span { progress: self, from, to }
    }

    fn emit(&mut self) {
        self.sink.report(ProgressEvent {
            step: self.job.step(),
            step_count: Job::STEP_COUNT,
            job: self.job,
            progress: self.progress,
            records_loaded: self.records_loaded,
        });
    }
}

pub(crate) struct Span<'p, 'a> {
    progress: &'p mut Progress<'a>,
    from: f64,
    to: f64,
}

impl Span<'_, '_> {
    pub(crate) fn set(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.progress.set(self.from + (self.to - self.from) * fraction);
    }
}

/// Fraction of `done` out of `total`, treating an empty total as finished.
pub(crate) fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 { 1.0 } else { done as f64 / total as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(run: impl FnOnce(&mut Progress<'_>)) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        let mut sink = |event: ProgressEvent| events.push(event);
        let mut progress = Progress::new(&mut sink);
        run(&mut progress);
        drop(progress);
        events
    }

    #[test]
    fn test_progress_never_decreases_within_a_job() {
        let events = collect(|progress| {
            progress.begin(Job::Load);
            progress.set(0.5);
            progress.set(0.25);
            progress.set(0.75);
            progress.set(7.0);
        });
        let values: Vec<f64> = events.iter().map(|e| e.progress).collect();
        assert_eq!(values, vec![0.0, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_begin_resets_progress_and_advances_step() {
        let events = collect(|progress| {
            progress.begin(Job::Load);
            progress.set(1.0);
            progress.begin(Job::Sort);
        });
        let last = events.last().unwrap();
        assert_eq!(last.step, 2);
        assert_eq!(last.step_count, Job::STEP_COUNT);
        assert_eq!(last.progress, 0.0);
    }

    #[test]
    fn test_span_maps_into_range() {
        let events = collect(|progress| {
            progress.begin(Job::Optimize);
            progress.span(0.3, 0.5).set(0.5);
        });
        assert!((events.last().unwrap().progress - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_records_loaded_is_sticky() {
        let events = collect(|progress| {
            progress.begin(Job::Load);
            progress.records_loaded(10);
            progress.set(0.5);
        });
        assert_eq!(events.last().unwrap().records_loaded, Some(10));
    }

    #[test]
    fn test_steps_are_contiguous() {
        let jobs = [
            Job::Load,
            Job::Sort,
            Job::SaveAuthor,
            Job::SaveSeries,
            Job::SaveTitle,
            Job::SaveGenre,
            Job::SaveOthers,
            Job::Optimize,
            Job::Stats,
            Job::Done,
        ];
        let steps: Vec<u32> = jobs.iter().map(Job::step).collect();
        assert_eq!(steps, (1..=Job::STEP_COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn test_fraction_of_empty_total() {
        assert_eq!(fraction(0, 0), 1.0);
        assert_eq!(fraction(1, 4), 0.25);
    }
}
