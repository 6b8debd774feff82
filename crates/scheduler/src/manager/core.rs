use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use cadence_core::{Clock, SchedulerConfig, TrueClock};

use crate::buckets::{Bucket, BucketList};
use crate::deferred::DeferredQueue;
use crate::error::SchedulerError;
use crate::events::{EventSink, LogSink, TaskEvent};
use crate::interrupt::InterruptToken;
use crate::metrics::SchedulerMetrics;
use crate::names::NameIndex;
use crate::profile::{ProfileInfo, Profiler, TimingProfiler};
use crate::task::{Invocation, Residence, TaskHandle, TaskSpec, TaskStatus};
use crate::yielding::{NoYield, YieldPolicy};

/// Name of the built-in task that wakes deferred tasks.
pub const DO_LATER_PROCESSOR: &str = "do-later-processor";

/// Sort of the built-in deferred processor; woken tasks with a higher sort
/// run in the same frame.
pub const DO_LATER_SORT: i32 = -10;

/// Mutable scheduler state. Never borrowed across a callback.
pub(crate) struct State {
    pub(super) buckets: BucketList,
    /// Added this frame, waiting to join the active list.
    pub(super) pending: BTreeMap<i32, Vec<TaskHandle>>,
    /// Same-sort additions currently being walked.
    pub(super) staged: Option<Bucket>,
    pub(super) deferred: DeferredQueue,
    pub(super) names: NameIndex,
    pub(super) current_time: f64,
    pub(super) current_frame: u64,
    /// Wall-clock stamp of the current frame, used for `last_run`.
    pub(super) frame_stamp: DateTime<Utc>,
    pub(super) profile_info: ProfileInfo,
    /// Frames requested by `profile_frames`, consumed by `run()`.
    pub(super) profile_frames: Option<u32>,
    pub(super) metrics: SchedulerMetrics,
    pub(super) verbose: bool,
    pub(super) in_step: bool,
    pub(super) destroyed: bool,
    /// Kept out of the name index; never listed or removable by callers.
    pub(super) do_later_processor: Option<TaskHandle>,
}

impl State {
    pub(super) fn is_internal(&self, task: &TaskHandle) -> bool {
        self.do_later_processor.as_ref() == Some(task)
    }
}

pub(crate) struct Shared {
    pub(super) config: SchedulerConfig,
    pub(super) clock: Rc<dyn Clock>,
    pub(super) sink: Rc<dyn EventSink>,
    pub(super) profiler: RefCell<Rc<dyn Profiler>>,
    pub(super) yield_policy: RefCell<Box<dyn YieldPolicy>>,
    pub(super) resume_hook: RefCell<Option<Box<dyn FnMut()>>>,
    pub(super) interrupt: InterruptToken,
    pub(super) running: Cell<bool>,
    pub(super) state: RefCell<State>,
}

/// Cooperative, frame-synchronous task scheduler.
///
/// Cheap to clone; every clone drives the same set of tasks. Callbacks may
/// hold a clone (or a [`WeakTaskManager`]) and call back into the manager
/// while a frame is running.
#[derive(Clone)]
pub struct TaskManager {
    pub(super) shared: Rc<Shared>,
}

/// Non-owning reference to a [`TaskManager`].
#[derive(Clone)]
pub struct WeakTaskManager {
    shared: Weak<Shared>,
}

impl WeakTaskManager {
    pub fn upgrade(&self) -> Option<TaskManager> {
        self.shared.upgrade().map(|shared| TaskManager { shared })
    }
}

/// Builder for [`TaskManager`].
pub struct TaskManagerBuilder {
    config: SchedulerConfig,
    clock: Option<Rc<dyn Clock>>,
    sink: Option<Rc<dyn EventSink>>,
    profiler: Option<Rc<dyn Profiler>>,
    yield_policy: Option<Box<dyn YieldPolicy>>,
    interrupt: Option<InterruptToken>,
}

impl TaskManagerBuilder {
    /// Time source. Defaults to [`TrueClock`].
    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Event sink. Defaults to [`LogSink`].
    pub fn events(mut self, sink: Rc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn profiler(mut self, profiler: Rc<dyn Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// End-of-frame yield. Defaults to [`NoYield`].
    pub fn yield_policy(mut self, policy: Box<dyn YieldPolicy>) -> Self {
        self.yield_policy = Some(policy);
        self
    }

    /// Share an interrupt token created ahead of time (e.g. by a signal
    /// handler).
    pub fn interrupt(mut self, token: InterruptToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    pub fn build(self) -> TaskManager {
        let state = State {
            buckets: BucketList::new(),
            pending: BTreeMap::new(),
            staged: None,
            deferred: DeferredQueue::new(),
            names: NameIndex::new(),
            current_time: 0.0,
            current_frame: 0,
            frame_stamp: Utc::now(),
            profile_info: ProfileInfo {
                task_id: self.config.profile_task_id,
                ..ProfileInfo::default()
            },
            profile_frames: None,
            metrics: SchedulerMetrics::default(),
            verbose: self.config.verbose,
            in_step: false,
            destroyed: false,
            do_later_processor: None,
        };

        let manager = TaskManager {
            shared: Rc::new(Shared {
                config: self.config,
                clock: self.clock.unwrap_or_else(|| Rc::new(TrueClock::new())),
                sink: self.sink.unwrap_or_else(|| Rc::new(LogSink)),
                profiler: RefCell::new(self.profiler.unwrap_or_else(|| Rc::new(TimingProfiler))),
                yield_policy: RefCell::new(self.yield_policy.unwrap_or_else(|| Box::new(NoYield))),
                resume_hook: RefCell::new(None),
                interrupt: self.interrupt.unwrap_or_default(),
                running: Cell::new(false),
                state: RefCell::new(state),
            }),
        };
        manager.install_do_later_processor();
        manager
    }
}

impl TaskManager {
    /// Manager with default collaborators and the given clock.
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        Self::builder(config).clock(clock).build()
    }

    pub fn builder(config: SchedulerConfig) -> TaskManagerBuilder {
        TaskManagerBuilder {
            config,
            clock: None,
            sink: None,
            profiler: None,
            yield_policy: None,
            interrupt: None,
        }
    }

    pub(crate) fn from_shared(shared: Rc<Shared>) -> Self {
        Self { shared }
    }

    pub fn downgrade(&self) -> WeakTaskManager {
        WeakTaskManager { shared: Rc::downgrade(&self.shared) }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.shared.clock)
    }

    /// Token for delivering interrupts from a signal handler.
    pub fn interrupt_token(&self) -> InterruptToken {
        self.shared.interrupt.clone()
    }

    pub fn set_yield_policy(&self, policy: Box<dyn YieldPolicy>) {
        *self.shared.yield_policy.borrow_mut() = policy;
    }

    pub fn set_profiler(&self, profiler: Rc<dyn Profiler>) {
        *self.shared.profiler.borrow_mut() = profiler;
    }

    /// Called at the start of every `run()`.
    pub fn set_resume_hook<F>(&self, hook: F)
    where
        F: FnMut() + 'static,
    {
        *self.shared.resume_hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    /// Remove every task, running each upon-death once, and refuse further
    /// use. Idempotent.
    pub fn destroy(&self) {
        let tasks = {
            let mut st = self.state_mut();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
            st.do_later_processor = None;
            let mut tasks = st.buckets.drain();
            if let Some(mut staged) = st.staged.take() {
                tasks.extend(staged.drain());
            }
            for (_, list) in std::mem::take(&mut st.pending) {
                tasks.extend(list);
            }
            tasks.extend(st.deferred.drain());
            tasks
        };

        for task in &tasks {
            self.retire(task);
        }
        self.state_mut().names.clear();
        self.shared.running.set(false);
        info!(tasks = tasks.len(), "task manager destroyed");
    }

    pub(super) fn state(&self) -> Ref<'_, State> {
        self.shared.state.borrow()
    }

    pub(super) fn state_mut(&self) -> RefMut<'_, State> {
        self.shared.state.borrow_mut()
    }

    pub(super) fn publish(&self, event: TaskEvent) {
        self.shared.sink.publish(&event);
    }

    pub(super) fn ensure_alive(&self) -> Result<(), SchedulerError> {
        if self.state().destroyed {
            return Err(SchedulerError::Destroyed);
        }
        Ok(())
    }

    /// Final removal: flag, run upon-death once, forget the name, announce.
    ///
    /// Safe to call repeatedly; only the first call has side effects beyond
    /// the name index.
    pub(super) fn retire(&self, task: &TaskHandle) {
        task.remove();
        task.set_residence(Residence::Removed);
        if task.mark_finished() {
            if let Some(upon_death) = task.take_upon_death() {
                upon_death(task);
            }
            self.forget(task);
            debug!(task_id = task.id(), task = task.name(), "task removed");
            self.publish(TaskEvent::Remove(task.clone()));
        } else {
            self.forget(task);
        }
    }

    /// Drop `task` from the name index, and its name's metrics once no task
    /// under that name is left.
    fn forget(&self, task: &TaskHandle) {
        let mut st = self.state_mut();
        st.names.unregister(task);
        if !st.names.is_registered(task.name()) {
            st.metrics.forget(task.name());
        }
    }

    fn install_do_later_processor(&self) {
        let manager = self.downgrade();
        let interval = self.shared.config.do_later_cleanup_interval.max(1);
        let mut passes: u64 = 0;
        let task = TaskSpec::new(DO_LATER_PROCESSOR, move |_call: &Invocation<'_>| {
            let Some(manager) = manager.upgrade() else {
                return TaskStatus::Done;
            };
            passes += 1;
            manager.process_do_laters(passes % interval == 0);
            TaskStatus::Cont
        })
        .sort(DO_LATER_SORT)
        .detached();

        let mut st = self.state_mut();
        task.set_start_time_frame(st.current_time, st.current_frame);
        task.set_residence(Residence::Pending);
        st.pending.entry(DO_LATER_SORT).or_default().push(task.clone());
        st.do_later_processor = Some(task);
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state();
        f.debug_struct("TaskManager")
            .field("active", &st.buckets.tasks().filter(|t| t.is_alive() && !st.is_internal(t)).count())
            .field("pending", &st.pending.values().flatten().filter(|t| t.is_alive() && !st.is_internal(t)).count())
            .field("deferred", &st.deferred.len())
            .field("deferred_entries", &st.deferred.capacity_used())
            .field("names", &st.names.len())
            .field("frame", &st.current_frame)
            .field("destroyed", &st.destroyed)
            .finish()
    }
}
