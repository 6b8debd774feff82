//! Cooperative, frame-synchronous task scheduler.
//!
//! Application code registers callbacks ("tasks") with a [`TaskManager`];
//! each call to [`TaskManager::step`] runs one frame, invoking every active
//! task once in ascending sort order. A task's return value decides its
//! fate: run again next frame, finish, or sleep for its delay. Deferred
//! tasks wait in a wake-time heap and join the active list when due.
//!
//! Everything here is single-threaded; only [`InterruptToken`] crosses
//! threads.

mod buckets;
pub mod composite;
mod deferred;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod manager;
pub mod metrics;
pub mod names;
pub mod profile;
pub mod task;
pub mod yielding;

pub use composite::{pause, sequence, task_loop};
pub use error::SchedulerError;
pub use events::{EventBus, EventEnvelope, EventRecorder, EventSink, LogSink, NullSink, TaskEvent};
pub use interrupt::{InterruptAction, InterruptToken};
pub use manager::{DO_LATER_PROCESSOR, DO_LATER_SORT, TaskManager, TaskManagerBuilder, TaskRef, WeakTaskManager};
pub use metrics::SchedulerMetrics;
pub use names::glob_match;
pub use profile::{ProfileInfo, ProfileSession, Profiler, TimingProfiler};
pub use task::{
    AGAIN, CONT, Callback, DONE, EXIT, IntoTaskResult, Invocation, MethodFn, Reply, Residence,
    TaskFault, TaskHandle, TaskId, TaskOwner, TaskResult, TaskSpec, TaskStats, TaskStatus,
};
pub use yielding::{EpochLimiter, NoYield, YieldFn, YieldPolicy};

pub use cadence_core::{Clock, FrameClock, ManualClock, SchedulerConfig, TrueClock};
