use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::SchedulerError;
use crate::events::TaskEvent;
use crate::task::{IntoTaskResult, Invocation, Residence, TaskHandle, TaskSpec};

use super::core::TaskManager;

/// Something `remove` can target: a name (every task under it) or one task.
#[derive(Debug, Clone)]
pub enum TaskRef {
    Name(String),
    Task(TaskHandle),
}

impl From<&str> for TaskRef {
    fn from(name: &str) -> Self {
        TaskRef::Name(name.to_string())
    }
}

impl From<String> for TaskRef {
    fn from(name: String) -> Self {
        TaskRef::Name(name)
    }
}

impl From<TaskHandle> for TaskRef {
    fn from(task: TaskHandle) -> Self {
        TaskRef::Task(task)
    }
}

impl From<&TaskHandle> for TaskRef {
    fn from(task: &TaskHandle) -> Self {
        TaskRef::Task(task.clone())
    }
}

impl TaskManager {
    /// Add a closure that runs every frame until it returns something other
    /// than CONT.
    pub fn add<F, R>(&self, name: impl Into<String>, f: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnMut(&Invocation<'_>) -> R + 'static,
        R: IntoTaskResult,
    {
        self.spawn(TaskSpec::new(name, f))
    }

    /// Add a task to pending staging.
    ///
    /// It joins the active list this frame if its sort is above the bucket
    /// being walked, otherwise next frame.
    pub fn spawn(&self, spec: TaskSpec) -> Result<TaskHandle, SchedulerError> {
        self.ensure_alive()?;
        let task = spec.into_scheduled()?;
        self.enqueue(&task);
        Ok(task)
    }

    /// Run `f` once, `delay` seconds from now.
    pub fn do_method_later<F, R>(
        &self,
        delay: f64,
        name: impl Into<String>,
        f: F,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: FnMut(&Invocation<'_>) -> R + 'static,
        R: IntoTaskResult,
    {
        self.spawn_later(delay, TaskSpec::new(name, f))
    }

    /// Queue a task to wake `delay` seconds from now.
    ///
    /// Negative delays are clamped to zero; non-finite delays are rejected.
    pub fn spawn_later(&self, delay: f64, spec: TaskSpec) -> Result<TaskHandle, SchedulerError> {
        self.ensure_alive()?;
        let task = spec.into_scheduled()?;
        task.set_delay(checked_delay(task.name(), delay)?);

        let now = self.shared.clock.frame_time();
        let (wake_time, verbose) = {
            let mut st = self.state_mut();
            st.names.register(&task);
            (st.deferred.push(&task, now), st.verbose)
        };
        self.adopt(&task);

        debug!(task_id = task.id(), task = task.name(), wake_time, "task deferred");
        if verbose {
            self.publish(TaskEvent::SpawnLater(task.clone()));
        }
        Ok(task)
    }

    /// Remove every live task named `target`, or one specific task.
    ///
    /// Returns how many live tasks were removed. Each runs its upon-death
    /// once and leaves the name index; the slot it occupied is reclaimed
    /// lazily.
    pub fn remove(&self, target: impl Into<TaskRef>) -> usize {
        match target.into() {
            TaskRef::Name(name) => {
                let tasks = self.state().names.lookup_all(&name);
                let mut removed = 0;
                for task in &tasks {
                    if task.is_alive() {
                        removed += 1;
                    }
                    self.retire(task);
                }
                removed
            }
            TaskRef::Task(task) => {
                let registered = self.state().names.contains(&task);
                if registered && task.is_alive() {
                    self.retire(&task);
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Remove every task whose name matches the glob `pattern`.
    pub fn remove_tasks_matching(&self, pattern: &str) -> usize {
        let names = self.state().names.matching_names(pattern);
        names.into_iter().map(|name| self.remove(name)).sum()
    }

    /// Stage a built task: start time, name index, pending bucket.
    pub(super) fn enqueue(&self, task: &TaskHandle) {
        {
            let mut st = self.state_mut();
            task.set_start_time_frame(st.current_time, st.current_frame);
            task.set_residence(Residence::Pending);
            st.names.register(task);
            st.pending.entry(task.sort()).or_default().push(task.clone());
        }
        self.adopt(task);
        trace!(task_id = task.id(), task = task.name(), sort = task.sort(), "task added");
    }

    fn adopt(&self, task: &TaskHandle) {
        task.bind_manager(Rc::downgrade(&self.shared));
        if let Some(owner) = task.owner() {
            owner.add_task(task);
        }
    }
}

fn checked_delay(name: &str, delay: f64) -> Result<f64, SchedulerError> {
    if !delay.is_finite() {
        return Err(SchedulerError::InvalidDelay { name: name.to_string(), delay });
    }
    if delay < 0.0 {
        warn!(task = name, delay, "negative delay, waking on the next pass");
        return Ok(0.0);
    }
    Ok(delay)
}
