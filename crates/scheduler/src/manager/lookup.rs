use tracing::debug;

use crate::metrics::SchedulerMetrics;
use crate::profile::ProfileInfo;
use crate::task::{MethodFn, Residence, TaskHandle};

use super::core::TaskManager;

impl TaskManager {
    pub fn has_task_named(&self, name: &str) -> bool {
        self.state().names.has_live(name)
    }

    pub fn get_tasks_named(&self, name: &str) -> Vec<TaskHandle> {
        self.state().names.lookup(name)
    }

    /// Live tasks whose name matches the glob `pattern`.
    pub fn get_tasks_matching(&self, pattern: &str) -> Vec<TaskHandle> {
        self.state().names.lookup_matching(pattern)
    }

    /// Every live task in the active list or waiting to join it, in walk
    /// order. The built-in deferred processor is not listed.
    pub fn get_tasks(&self) -> Vec<TaskHandle> {
        let st = self.state();
        let mut tasks: Vec<TaskHandle> = st.buckets.tasks().cloned().collect();
        if let Some(staged) = &st.staged {
            tasks.extend(staged.iter().cloned());
        }
        tasks.extend(st.pending.values().flatten().cloned());
        tasks.retain(|t| t.is_alive() && !st.is_internal(t));
        tasks
    }

    /// Live deferred tasks, earliest wake first.
    pub fn get_do_laters(&self) -> Vec<TaskHandle> {
        let mut tasks: Vec<TaskHandle> = self.state().deferred.tasks().cloned().collect();
        tasks.sort_by(|a, b| {
            let (a_wake, b_wake) = (a.wake_time().unwrap_or(f64::MAX), b.wake_time().unwrap_or(f64::MAX));
            a_wake.total_cmp(&b_wake).then_with(|| a.id().cmp(&b.id()))
        });
        tasks
    }

    /// Rebind every live task whose bound method is `old` to `new`.
    ///
    /// A task whose callback is executing when this is called is skipped.
    /// Returns how many tasks were rebound.
    pub fn replace_method(&self, old: MethodFn, new: MethodFn) -> usize {
        let tasks: Vec<TaskHandle> = {
            let st = self.state();
            let mut tasks: Vec<TaskHandle> = st.buckets.tasks().cloned().collect();
            if let Some(staged) = &st.staged {
                tasks.extend(staged.iter().cloned());
            }
            tasks.extend(st.pending.values().flatten().cloned());
            tasks.extend(st.deferred.tasks().cloned());
            tasks
        };
        let replaced = tasks.iter().filter(|task| task.replace_method(old, new)).count();
        debug!(replaced, "methods replaced");
        replaced
    }

    /// Re-queue a deferred task so it wakes `delay` seconds from now.
    pub fn recalc_wake_time(&self, task: &TaskHandle) -> bool {
        if task.is_removed() || task.residence() != Residence::Deferred {
            return false;
        }
        let now = self.shared.clock.frame_time();
        let wake_time = self.state_mut().deferred.push(task, now);
        debug!(task_id = task.id(), task = task.name(), wake_time, "wake time recalculated");
        true
    }

    /// Zero the timing stats of every active task and restart their clocks.
    pub fn reset_stats(&self) {
        let st = self.state();
        for task in st.buckets.tasks() {
            task.reset_stats();
            task.set_start_time_frame(st.current_time, st.current_frame);
        }
    }

    /// Profile `task` the next time it runs; `None` turns task profiling off.
    pub fn set_profile_task(&self, task: Option<&TaskHandle>) {
        if let Some(task) = task {
            task.set_profiled(false);
        }
        let mut st = self.state_mut();
        let frames_result = st.profile_info.frames_result.take();
        st.profile_info = ProfileInfo {
            task_id: task.map(TaskHandle::id),
            frames_result,
            ..ProfileInfo::default()
        };
    }

    pub fn profile_info(&self) -> ProfileInfo {
        self.state().profile_info.clone()
    }

    /// Have the next `run()` iteration profile `frames` frames as one session.
    pub fn profile_frames(&self, frames: u32) {
        self.state_mut().profile_frames = Some(frames.max(1));
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.state_mut().verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.state().verbose
    }

    /// Frame time captured at the start of the current (or last) frame.
    pub fn current_time(&self) -> f64 {
        self.state().current_time
    }

    pub fn current_frame(&self) -> u64 {
        self.state().current_frame
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let st = self.state();
        let mut metrics = st.metrics.clone();
        let listed = |t: &&TaskHandle| t.is_alive() && !st.is_internal(t);
        metrics.active = st.buckets.tasks().filter(listed).count();
        metrics.pending = st.pending.values().flatten().filter(listed).count()
            + st.staged.as_ref().map_or(0, |b| b.iter().filter(listed).count());
        metrics.deferred = st.deferred.len();
        metrics
    }
}
