//! Composite tasks: timed pauses, sequences and loops of child tasks.
//!
//! Children are detached task records driven by their parent; they never
//! enter the scheduler on their own. A child's time and frame are measured
//! from the point the parent first reached it.

use crate::task::{Invocation, Reply, TaskFault, TaskHandle, TaskSpec, TaskStatus};

/// A task that returns CONT until `delay` seconds have passed, then DONE.
///
/// Only useful as a child of [`sequence`] or [`task_loop`].
pub fn pause(delay: f64) -> TaskSpec {
    TaskSpec::new("pause", |call: &Invocation<'_>| {
        let task = call.this();
        if task.time() < task.delay() {
            TaskStatus::Cont
        } else {
            TaskStatus::Done
        }
    })
    .delay(delay)
}

/// Run `children` one after another, advancing when a child returns DONE.
pub fn sequence<I>(children: I) -> TaskSpec
where
    I: IntoIterator<Item = TaskSpec>,
{
    composite("sequence", children, false)
}

/// Like [`sequence`], but start over after the last child. A wrap ends
/// the loop's turn for the frame.
pub fn task_loop<I>(children: I) -> TaskSpec
where
    I: IntoIterator<Item = TaskSpec>,
{
    composite("loop", children, true)
}

fn composite<I>(name: &str, children: I, wrap: bool) -> TaskSpec
where
    I: IntoIterator<Item = TaskSpec>,
{
    let mut cursor = Cursor {
        children: children.into_iter().map(TaskSpec::detached).collect(),
        index: 0,
        started: None,
        wrap,
    };
    TaskSpec::new(name, move |call: &Invocation<'_>| cursor.advance(call.this()))
}

struct Cursor {
    children: Vec<TaskHandle>,
    index: usize,
    /// Highest child index whose start time has been set this pass.
    started: Option<usize>,
    wrap: bool,
}

impl Cursor {
    fn advance(&mut self, parent: &TaskHandle) -> Result<Reply, TaskFault> {
        if self.children.is_empty() {
            return Ok(TaskStatus::Done.into());
        }
        loop {
            let child = &self.children[self.index];
            if self.started.map_or(true, |started| self.index > started) {
                child.set_start_time_frame(parent.time(), parent.frame());
                self.started = Some(self.index);
            }
            child.set_current_time_frame(parent.time(), parent.frame());

            match child.run_once()? {
                TaskStatus::Cont | TaskStatus::Again => return Ok(TaskStatus::Cont.into()),
                TaskStatus::Exit => return Ok(TaskStatus::Exit.into()),
                TaskStatus::Done => self.index += 1,
            }

            if self.index == self.children.len() {
                if !self.wrap {
                    return Ok(TaskStatus::Done.into());
                }
                self.index = 0;
                self.started = None;
                return Ok(TaskStatus::Cont.into());
            }
        }
    }
}
