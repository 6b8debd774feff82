//! Deferred ("do-later") queue: a min-heap of tasks keyed by wake time.
//!
//! Entries are never removed from the middle of the heap. Removing a task
//! leaves its entry behind until it reaches the root or a periodic sweep
//! drops it; re-queueing a task bumps its generation so older entries for
//! the same task are recognised as stale and skipped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::task::{Residence, TaskHandle, TaskId};

#[derive(Debug)]
struct Entry {
    wake_time: f64,
    id: TaskId,
    generation: u64,
    task: TaskHandle,
}

impl Entry {
    fn is_current(&self) -> bool {
        self.generation == self.task.wake_generation()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap yields the earliest wake time; ties go to the
    // older task.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_time
            .total_cmp(&self.wake_time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Result of draining due entries.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    /// Live tasks whose wake time has passed, earliest first.
    pub(crate) woken: Vec<TaskHandle>,
    /// Tasks found flagged removed.
    pub(crate) reaped: Vec<TaskHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct DeferredQueue {
    heap: BinaryHeap<Entry>,
}

impl DeferredQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `task` to wake at `now + task.delay()`. Any earlier entry for
    /// the same task becomes stale.
    pub(crate) fn push(&mut self, task: &TaskHandle, now: f64) -> f64 {
        let wake_time = now + task.delay();
        let generation = task.bump_wake_generation();
        task.set_wake_time(Some(wake_time));
        task.set_residence(Residence::Deferred);
        self.heap.push(Entry { wake_time, id: task.id(), generation, task: task.clone() });
        wake_time
    }

    /// Wake time at the root, discarding stale entries on the way.
    pub(crate) fn next_wake(&mut self) -> Option<f64> {
        while let Some(entry) = self.heap.peek() {
            if entry.is_current() {
                return Some(entry.wake_time);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every entry with `wake_time <= now`.
    pub(crate) fn drain_due(&mut self, now: f64) -> Drained {
        let mut drained = Drained::default();
        while self.heap.peek().is_some_and(|e| e.wake_time <= now) {
            let Some(entry) = self.heap.pop() else { break };
            if !entry.is_current() {
                continue;
            }
            entry.task.set_wake_time(None);
            if entry.task.is_removed() {
                drained.reaped.push(entry.task);
            } else {
                drained.woken.push(entry.task);
            }
        }
        drained
    }

    /// Drop removed and stale entries, returning the removed tasks.
    pub(crate) fn sweep(&mut self) -> Vec<TaskHandle> {
        let mut reaped = Vec::new();
        self.heap.retain(|entry| {
            if !entry.is_current() {
                return false;
            }
            if entry.task.is_removed() {
                reaped.push(entry.task.clone());
                return false;
            }
            true
        });
        reaped
    }

    /// Live, current entries in no particular order.
    pub(crate) fn tasks(&self) -> impl Iterator<Item = &TaskHandle> {
        self.heap
            .iter()
            .filter(|e| e.is_current() && !e.task.is_removed())
            .map(|e| &e.task)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks().count()
    }

    /// Raw heap size, including entries waiting to be swept.
    pub(crate) fn capacity_used(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<TaskHandle> {
        self.heap
            .drain()
            .filter(|e| e.is_current())
            .map(|e| e.task)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskSpec, TaskStatus};

    fn task(name: &str, delay: f64) -> TaskHandle {
        TaskSpec::new(name, |_| TaskStatus::Done).delay(delay).detached()
    }

    fn names(tasks: &[TaskHandle]) -> Vec<&str> {
        tasks.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn drains_in_wake_order() {
        let mut q = DeferredQueue::new();
        q.push(&task("late", 3.0), 0.0);
        q.push(&task("early", 1.0), 0.0);
        q.push(&task("mid", 2.0), 0.0);

        assert_eq!(q.next_wake(), Some(1.0));
        assert!(q.drain_due(0.5).woken.is_empty());

        let drained = q.drain_due(2.0);
        assert_eq!(names(&drained.woken), vec!["early", "mid"]);
        assert!(drained.woken.iter().all(|t| t.wake_time().is_none()));
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_wake(), Some(3.0));
    }

    #[test]
    fn equal_wake_times_keep_creation_order() {
        let mut q = DeferredQueue::new();
        let a = task("a", 1.0);
        let b = task("b", 1.0);
        q.push(&b, 0.0);
        q.push(&a, 0.0);
        let drained = q.drain_due(1.0);
        assert_eq!(names(&drained.woken), vec!["a", "b"]);
    }

    #[test]
    fn removed_entries_are_reaped_not_woken() {
        let mut q = DeferredQueue::new();
        let gone = task("gone", 1.0);
        q.push(&gone, 0.0);
        q.push(&task("kept", 1.0), 0.0);
        gone.remove();

        assert_eq!(q.len(), 1);
        let drained = q.drain_due(1.0);
        assert_eq!(names(&drained.woken), vec!["kept"]);
        assert_eq!(names(&drained.reaped), vec!["gone"]);
    }

    #[test]
    fn requeue_makes_old_entry_stale() {
        let mut q = DeferredQueue::new();
        let t = task("t", 1.0);
        q.push(&t, 0.0);
        t.set_delay(5.0);
        q.push(&t, 0.0);

        assert_eq!(q.capacity_used(), 2);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_wake(), Some(5.0));
        assert_eq!(q.capacity_used(), 1);
        assert!(q.drain_due(1.0).woken.is_empty());
        assert_eq!(names(&q.drain_due(5.0).woken), vec!["t"]);
    }

    #[test]
    fn sweep_drops_removed_and_stale() {
        let mut q = DeferredQueue::new();
        let a = task("a", 10.0);
        let b = task("b", 10.0);
        q.push(&a, 0.0);
        q.push(&b, 0.0);
        q.push(&b, 1.0);
        a.remove();

        let reaped = q.sweep();
        assert_eq!(names(&reaped), vec!["a"]);
        assert_eq!(q.capacity_used(), 1);
        assert_eq!(q.next_wake(), Some(11.0));
    }
}
