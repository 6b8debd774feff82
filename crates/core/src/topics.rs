//! Event names published by the task manager.
//!
//! External message buses subscribe to these names; the values are part of
//! the public contract and must not change.

/// A task moved from pending staging into the active list for the first time.
pub const TASK_SPAWN: &str = "task-spawn";

/// A task was finally removed, after its upon-death callback ran.
pub const TASK_REMOVE: &str = "task-remove";

/// `run()` re-aligned the clock after detecting wall-clock slip.
pub const CLOCK_RESET: &str = "clock-reset";

/// Verbose mode: a deferred task was queued.
pub const TASK_SPAWN_LATER: &str = "task-spawn-later";

/// Verbose mode: a task returned AGAIN and was re-queued.
pub const TASK_AGAIN: &str = "task-again";

/// Every topic, in declaration order.
pub const ALL: &[&str] = &[TASK_SPAWN, TASK_REMOVE, CLOCK_RESET, TASK_SPAWN_LATER, TASK_AGAIN];
