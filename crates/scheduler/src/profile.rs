//! Profiling hooks for single tasks and whole frames.

use std::time::Instant;

use serde::Serialize;

use crate::task::TaskId;

/// Supplies named profiling sessions.
pub trait Profiler {
    fn start(&self, label: &str) -> Box<dyn ProfileSession>;
}

/// One running profiling session.
pub trait ProfileSession {
    /// Stop and return a human-readable report.
    fn finish(self: Box<Self>) -> String;
}

/// Wall-clock profiler reporting elapsed milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingProfiler;

struct TimingSession {
    label: String,
    started: Instant,
}

impl Profiler for TimingProfiler {
    fn start(&self, label: &str) -> Box<dyn ProfileSession> {
        Box::new(TimingSession { label: label.to_string(), started: Instant::now() })
    }
}

impl ProfileSession for TimingSession {
    fn finish(self: Box<Self>) -> String {
        format!("{}: {:.3} ms", self.label, self.started.elapsed().as_secs_f64() * 1000.0)
    }
}

/// Scratchpad describing the most recent profiled run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileInfo {
    /// Task to profile the next time it runs.
    pub task_id: Option<TaskId>,
    /// Measured duration of the profiled invocation.
    pub dt: Option<f64>,
    /// Report from the last profiled task.
    pub last_result: Option<String>,
    /// Report from the last `profile_frames` session.
    pub frames_result: Option<String>,
}
