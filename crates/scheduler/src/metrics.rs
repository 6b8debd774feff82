use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Task manager counters, exposed for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Invocations by task name.
    pub tasks_executed: HashMap<String, u64>,
    /// Average invocation duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Wall-clock stamp of the frame in which each task name last ran.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Completed calls to `step()`.
    pub frames: u64,
    /// Task faults propagated out of `step()`.
    pub faults: u64,
    /// Tasks in the active list at snapshot time.
    pub active: usize,
    /// Tasks staged for the active list at snapshot time.
    pub pending: usize,
    /// Tasks waiting in the deferred queue at snapshot time.
    pub deferred: usize,
}

impl SchedulerMetrics {
    /// Record a task invocation during the frame stamped `at`.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration, at: DateTime<Utc>) {
        *self.tasks_executed.entry(task_name.to_string()).or_default() += 1;
        self.last_run.insert(task_name.to_string(), at);

        let count = self.tasks_executed[task_name];
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_name.to_string(), new_avg);
    }

    pub fn total_executions(&self) -> u64 {
        self.tasks_executed.values().sum()
    }

    /// Drop every per-name entry for `task_name`.
    pub fn forget(&mut self, task_name: &str) {
        self.tasks_executed.remove(task_name);
        self.avg_task_duration.remove(task_name);
        self.last_run.remove(task_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        let stamp = Utc::now();
        m.record_execution("walk", Duration::from_millis(4), stamp);

        assert_eq!(m.tasks_executed["walk"], 1);
        assert_eq!(m.last_run["walk"], stamp);
        assert_eq!(m.avg_task_duration["walk"], Duration::from_millis(4));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        let stamp = Utc::now();
        m.record_execution("walk", Duration::from_millis(100), stamp);
        m.record_execution("walk", Duration::from_millis(200), stamp);
        m.record_execution("jump", Duration::from_millis(1), stamp);

        assert_eq!(m.tasks_executed["walk"], 2);
        let avg = m.avg_task_duration["walk"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
        assert_eq!(m.total_executions(), 3);
    }

    #[test]
    fn forget_drops_one_name() {
        let mut m = SchedulerMetrics::default();
        let stamp = Utc::now();
        m.record_execution("walk", Duration::from_millis(1), stamp);
        m.record_execution("jump", Duration::from_millis(1), stamp);

        m.forget("walk");
        assert!(!m.tasks_executed.contains_key("walk"));
        assert!(!m.avg_task_duration.contains_key("walk"));
        assert!(!m.last_run.contains_key("walk"));
        assert_eq!(m.total_executions(), 1);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.frames, 0);
        assert_eq!(m.faults, 0);
        assert!(m.tasks_executed.is_empty());
    }
}
