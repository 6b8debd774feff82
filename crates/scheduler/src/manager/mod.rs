//! Task manager -- owns every task and steps them once per frame.
//!
//! Split into focused submodules:
//! - `core`: TaskManager handle, builder, shared state, removal protocol
//! - `spawn`: adding, deferring and removing tasks
//! - `step`: the per-frame engine, deferred processing and the run loop
//! - `lookup`: queries, method replacement, stats and profiling controls
//! - `report`: human-readable table of every task

mod core;
mod lookup;
mod report;
mod spawn;
mod step;

pub(crate) use self::core::Shared;
pub use self::core::{DO_LATER_PROCESSOR, DO_LATER_SORT, TaskManager, TaskManagerBuilder, WeakTaskManager};
pub use self::spawn::TaskRef;
