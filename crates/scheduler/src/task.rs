//! Task records, callbacks and the status codons they return.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchedulerError;
use crate::manager::Shared;

/// Process-unique task identifier. Never reused.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

// ── Codons ────────────────────────────────────────────────────

/// Raw codon: remove the task and treat as finished abnormally.
pub const EXIT: i32 = -1;
/// Raw codon: remove the task, it completed.
pub const DONE: i32 = 0;
/// Raw codon: run the task again next frame.
pub const CONT: i32 = 1;
/// Raw codon: re-queue the task after its delay.
pub const AGAIN: i32 = 2;

/// What a task wants the scheduler to do after an invocation.
///
/// The discriminants are the raw codon values external code compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TaskStatus {
    Exit = EXIT,
    Done = DONE,
    Cont = CONT,
    Again = AGAIN,
}

impl TryFrom<i32> for TaskStatus {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            EXIT => Ok(TaskStatus::Exit),
            DONE => Ok(TaskStatus::Done),
            CONT => Ok(TaskStatus::Cont),
            AGAIN => Ok(TaskStatus::Again),
            other => Err(other),
        }
    }
}

/// The value a callback hands back.
///
/// `Nothing` is a synonym for [`TaskStatus::Done`]; `Code` carries a raw
/// codon from code that speaks integers and is validated by the step engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Status(TaskStatus),
    Code(i32),
    Nothing,
}

impl Reply {
    /// Resolve into a status, or hand back the unrecognised code.
    pub fn status(self) -> Result<TaskStatus, i32> {
        match self {
            Reply::Status(status) => Ok(status),
            Reply::Code(code) => TaskStatus::try_from(code),
            Reply::Nothing => Ok(TaskStatus::Done),
        }
    }
}

impl From<TaskStatus> for Reply {
    fn from(status: TaskStatus) -> Self {
        Reply::Status(status)
    }
}

impl From<i32> for Reply {
    fn from(code: i32) -> Self {
        Reply::Code(code)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Nothing
    }
}

impl From<Option<TaskStatus>> for Reply {
    fn from(status: Option<TaskStatus>) -> Self {
        status.map_or(Reply::Nothing, Reply::Status)
    }
}

/// Error raised from inside a task callback.
pub type TaskFault = anyhow::Error;

/// Result of one callback invocation.
pub type TaskResult = Result<Reply, TaskFault>;

/// Anything a task closure may return.
pub trait IntoTaskResult {
    fn into_task_result(self) -> TaskResult;
}

macro_rules! impl_into_task_result {
    ($($ty:ty),*) => {
        $(
            impl IntoTaskResult for $ty {
                fn into_task_result(self) -> TaskResult {
                    Ok(Reply::from(self))
                }
            }

            impl<E: Into<TaskFault>> IntoTaskResult for Result<$ty, E> {
                fn into_task_result(self) -> TaskResult {
                    self.map(Reply::from).map_err(Into::into)
                }
            }
        )*
    };
}

impl_into_task_result!(TaskStatus, i32, (), Option<TaskStatus>);

impl IntoTaskResult for Reply {
    fn into_task_result(self) -> TaskResult {
        Ok(self)
    }
}

impl<E: Into<TaskFault>> IntoTaskResult for Result<Reply, E> {
    fn into_task_result(self) -> TaskResult {
        self.map_err(Into::into)
    }
}

// ── Callbacks ─────────────────────────────────────────────────

/// What a callback sees on each invocation.
pub struct Invocation<'a> {
    task: &'a TaskHandle,
    args: &'a [Value],
    append_task: bool,
}

impl<'a> Invocation<'a> {
    /// Extra arguments supplied when the task was created.
    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    pub fn arg(&self, index: usize) -> Option<&'a Value> {
        self.args.get(index)
    }

    /// The task handle, present when the task was created with `append_task`.
    pub fn task(&self) -> Option<&'a TaskHandle> {
        self.append_task.then_some(self.task)
    }

    /// The invoked task, regardless of `append_task`.
    pub(crate) fn this(&self) -> &'a TaskHandle {
        self.task
    }
}

/// A boxed standalone task function.
pub type TaskFn = Box<dyn FnMut(&Invocation<'_>) -> TaskResult>;

/// A method body bound to a receiver; the unit `replace_method` swaps.
pub type MethodFn = fn(&dyn Any, &Invocation<'_>) -> TaskResult;

/// The code a task runs.
pub enum Callback {
    Standalone(TaskFn),
    Bound { receiver: Rc<dyn Any>, method: MethodFn },
}

impl Callback {
    /// Wrap a closure.
    pub fn new<F, R>(mut f: F) -> Self
    where
        F: FnMut(&Invocation<'_>) -> R + 'static,
        R: IntoTaskResult,
    {
        Callback::Standalone(Box::new(move |call| f(call).into_task_result()))
    }

    /// Bind `method` to `receiver`.
    pub fn bound<T: Any>(receiver: Rc<T>, method: MethodFn) -> Self {
        Callback::Bound { receiver, method }
    }

    fn invoke(&mut self, call: &Invocation<'_>) -> TaskResult {
        match self {
            Callback::Standalone(f) => f(call),
            Callback::Bound { receiver, method } => method(receiver.as_ref(), call),
        }
    }

    /// Rebind a bound method whose body is `old`. Returns whether it matched.
    fn replace_method(&mut self, old: MethodFn, new: MethodFn) -> bool {
        match self {
            Callback::Bound { method, .. } if same_method(*method, old) => {
                *method = new;
                true
            }
            _ => false,
        }
    }
}

fn same_method(a: MethodFn, b: MethodFn) -> bool {
    a as usize == b as usize
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Standalone(_) => f.write_str("Callback::Standalone"),
            Callback::Bound { method, .. } => {
                write!(f, "Callback::Bound({:#x})", *method as usize)
            }
        }
    }
}

/// Bookkeeping hooks for subsystems that own tasks.
pub trait TaskOwner {
    /// Called once the task has been handed to the manager.
    fn add_task(&self, _task: &TaskHandle) {}

    /// Called when the task is removed.
    fn clear_task(&self, task: &TaskHandle);
}

/// One-shot callback run after final removal.
pub type UponDeath = Box<dyn FnOnce(&TaskHandle)>;

// ── Timing ────────────────────────────────────────────────────

/// Per-task execution timing, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TaskStats {
    /// Duration of the most recent invocation.
    pub dt: f64,
    /// Mean over all recorded invocations.
    pub avg_dt: f64,
    pub max_dt: f64,
    pub running_total: f64,
    pub samples: u64,
}

impl TaskStats {
    pub(crate) fn record(&mut self, dt: f64) {
        self.dt = dt;
        if dt > self.max_dt {
            self.max_dt = dt;
        }
        self.running_total += dt;
        self.samples += 1;
        self.avg_dt = self.running_total / self.samples as f64;
    }
}

/// Where a task currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Residence {
    /// Built but never scheduled (composite children).
    Detached,
    Pending,
    Active,
    Deferred,
    Removed,
}

// ── TaskSpec ──────────────────────────────────────────────────

/// Everything needed to create a task; consumed by `TaskManager::spawn`.
pub struct TaskSpec {
    name: String,
    callback: Callback,
    sort: i32,
    delay: f64,
    extra_args: Option<Vec<Value>>,
    append_task: Option<bool>,
    upon_death: Option<UponDeath>,
    owner: Option<Rc<dyn TaskOwner>>,
}

impl TaskSpec {
    pub fn new<F, R>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&Invocation<'_>) -> R + 'static,
        R: IntoTaskResult,
    {
        Self::with_callback(name, Callback::new(f))
    }

    pub fn with_callback(name: impl Into<String>, callback: Callback) -> Self {
        Self {
            name: name.into(),
            callback,
            sort: 0,
            delay: 0.0,
            extra_args: None,
            append_task: None,
            upon_death: None,
            owner: None,
        }
    }

    /// A task running `method` bound to `receiver`.
    pub fn bound<T: Any>(name: impl Into<String>, receiver: Rc<T>, method: MethodFn) -> Self {
        Self::with_callback(name, Callback::bound(receiver, method))
    }

    pub fn sort(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    /// Delay read by pauses and by AGAIN re-queues. `TaskManager::spawn_later`
    /// replaces it with the delay it is given.
    pub fn delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    /// Arguments passed on every invocation. Supplying them turns
    /// `append_task` off unless it is set explicitly.
    pub fn extra_args(mut self, args: Vec<Value>) -> Self {
        self.extra_args = Some(args);
        self
    }

    pub fn append_task(mut self, append: bool) -> Self {
        self.append_task = Some(append);
        self
    }

    pub fn upon_death<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&TaskHandle) + 'static,
    {
        self.upon_death = Some(Box::new(f));
        self
    }

    pub fn owner(mut self, owner: Rc<dyn TaskOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a record that is never scheduled on its own, e.g. a child of a
    /// sequence.
    pub fn detached(self) -> TaskHandle {
        self.build()
    }

    pub(crate) fn into_scheduled(self) -> Result<TaskHandle, SchedulerError> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidName(self.name));
        }
        Ok(self.build())
    }

    fn build(self) -> TaskHandle {
        let append_task = self.append_task.unwrap_or(self.extra_args.is_none());
        let args: Rc<[Value]> = self.extra_args.unwrap_or_default().into();
        TaskHandle(Rc::new(TaskInner {
            id: next_task_id(),
            name: self.name,
            sort: self.sort,
            append_task,
            callback: RefCell::new(Some(self.callback)),
            extra_args: RefCell::new(args),
            upon_death: RefCell::new(self.upon_death),
            owner: RefCell::new(self.owner),
            removed: Cell::new(false),
            finished: Cell::new(false),
            spawned: Cell::new(false),
            profiled: Cell::new(false),
            residence: Cell::new(Residence::Detached),
            delay: Cell::new(self.delay),
            wake_time: Cell::new(None),
            wake_generation: Cell::new(0),
            started: Cell::new(false),
            start_time: Cell::new(0.0),
            start_frame: Cell::new(0),
            time: Cell::new(0.0),
            frame: Cell::new(0),
            stats: Cell::new(TaskStats::default()),
            manager: RefCell::new(Weak::new()),
        }))
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("sort", &self.sort)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

// ── TaskHandle ────────────────────────────────────────────────

struct TaskInner {
    id: TaskId,
    name: String,
    sort: i32,
    append_task: bool,
    callback: RefCell<Option<Callback>>,
    extra_args: RefCell<Rc<[Value]>>,
    upon_death: RefCell<Option<UponDeath>>,
    owner: RefCell<Option<Rc<dyn TaskOwner>>>,
    removed: Cell<bool>,
    /// Upon-death has run and task-remove was published.
    finished: Cell<bool>,
    /// task-spawn was published.
    spawned: Cell<bool>,
    profiled: Cell<bool>,
    residence: Cell<Residence>,
    delay: Cell<f64>,
    wake_time: Cell<Option<f64>>,
    /// Bumped on every deferred push; older heap entries are stale.
    wake_generation: Cell<u64>,
    started: Cell<bool>,
    start_time: Cell<f64>,
    start_frame: Cell<u64>,
    time: Cell<f64>,
    frame: Cell<u64>,
    stats: Cell<TaskStats>,
    manager: RefCell<Weak<Shared>>,
}

/// Shared handle to a task record. Clones refer to the same task.
#[derive(Clone)]
pub struct TaskHandle(Rc<TaskInner>);

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The name with every digit stripped, e.g. `enemy-12-ai` -> `enemy--ai`.
    pub fn name_pattern(&self) -> String {
        self.0.name.chars().filter(|c| !c.is_ascii_digit()).collect()
    }

    pub fn sort(&self) -> i32 {
        self.0.sort
    }

    /// Seconds since the task first ran (or woke).
    pub fn time(&self) -> f64 {
        self.0.time.get()
    }

    /// Frames since the task first ran (or woke).
    pub fn frame(&self) -> u64 {
        self.0.frame.get()
    }

    pub fn delay(&self) -> f64 {
        self.0.delay.get()
    }

    /// Change the delay used by the next AGAIN re-queue or wake recalculation.
    /// Negative values are treated as zero.
    pub fn set_delay(&self, delay: f64) {
        self.0.delay.set(delay.max(0.0));
    }

    /// Absolute wake time while the task sits in the deferred queue.
    pub fn wake_time(&self) -> Option<f64> {
        self.0.wake_time.get()
    }

    pub fn stats(&self) -> TaskStats {
        self.0.stats.get()
    }

    pub fn residence(&self) -> Residence {
        self.0.residence.get()
    }

    pub fn is_alive(&self) -> bool {
        !self.0.removed.get()
    }

    pub fn is_removed(&self) -> bool {
        self.0.removed.get()
    }

    pub fn append_task(&self) -> bool {
        self.0.append_task
    }

    /// Whether this task has already been wrapped in a profiling session.
    pub fn profiled(&self) -> bool {
        self.0.profiled.get()
    }

    /// Flag the task as removed and drop what it holds on to.
    ///
    /// The callback is never invoked again; the record is reaped by the step
    /// engine later. Idempotent. Returns whether this call did the removal.
    pub fn remove(&self) -> bool {
        if self.0.removed.replace(true) {
            return false;
        }
        self.0.callback.borrow_mut().take();
        *self.0.extra_args.borrow_mut() = Rc::from(Vec::new());
        let owner = self.0.owner.borrow_mut().take();
        if let Some(owner) = owner {
            owner.clear_task(self);
        }
        true
    }

    /// If the task is waiting in the deferred queue, move its wake time to
    /// `now + delay`. Returns whether it was re-queued.
    pub fn recalc_wake_time(&self) -> bool {
        let shared = self.0.manager.borrow().upgrade();
        match shared {
            Some(shared) => crate::manager::TaskManager::from_shared(shared).recalc_wake_time(self),
            None => false,
        }
    }

    pub(crate) fn set_start_time_frame(&self, time: f64, frame: u64) {
        self.0.start_time.set(time);
        self.0.start_frame.set(frame);
        self.0.started.set(true);
    }

    /// Whether a start time has been recorded.
    pub(crate) fn has_started(&self) -> bool {
        self.0.started.get()
    }

    pub(crate) fn set_current_time_frame(&self, time: f64, frame: u64) {
        self.0.time.set(time - self.0.start_time.get());
        self.0.frame.set(frame.saturating_sub(self.0.start_frame.get()));
    }

    pub(crate) fn set_residence(&self, residence: Residence) {
        self.0.residence.set(residence);
    }

    pub(crate) fn set_wake_time(&self, wake: Option<f64>) {
        self.0.wake_time.set(wake);
    }

    pub(crate) fn wake_generation(&self) -> u64 {
        self.0.wake_generation.get()
    }

    pub(crate) fn bump_wake_generation(&self) -> u64 {
        let next = self.0.wake_generation.get() + 1;
        self.0.wake_generation.set(next);
        next
    }

    pub(crate) fn record_dt(&self, dt: f64) {
        let mut stats = self.0.stats.get();
        stats.record(dt);
        self.0.stats.set(stats);
    }

    pub(crate) fn reset_stats(&self) {
        self.0.stats.set(TaskStats::default());
    }

    pub(crate) fn set_profiled(&self, profiled: bool) {
        self.0.profiled.set(profiled);
    }

    /// Returns true the first time it is called.
    pub(crate) fn mark_spawned(&self) -> bool {
        !self.0.spawned.replace(true)
    }

    /// Returns true the first time it is called.
    pub(crate) fn mark_finished(&self) -> bool {
        !self.0.finished.replace(true)
    }

    pub(crate) fn take_upon_death(&self) -> Option<UponDeath> {
        self.0.upon_death.borrow_mut().take()
    }

    pub(crate) fn owner(&self) -> Option<Rc<dyn TaskOwner>> {
        self.0.owner.borrow().clone()
    }

    pub(crate) fn bind_manager(&self, shared: Weak<Shared>) {
        *self.0.manager.borrow_mut() = shared;
    }

    pub(crate) fn replace_method(&self, old: MethodFn, new: MethodFn) -> bool {
        if self.is_removed() {
            return false;
        }
        match self.0.callback.borrow_mut().as_mut() {
            Some(callback) => callback.replace_method(old, new),
            None => false,
        }
    }

    /// Run the callback once. `None` when the task has no callback left
    /// (it was removed).
    ///
    /// The callback is taken out for the duration of the call so it may
    /// freely reach back into its own handle, including removing itself.
    pub(crate) fn invoke(&self) -> Option<TaskResult> {
        let mut callback = self.0.callback.borrow_mut().take()?;
        let args = Rc::clone(&self.0.extra_args.borrow());
        let call = Invocation { task: self, args: &args, append_task: self.0.append_task };
        let result = callback.invoke(&call);
        if !self.is_removed() {
            *self.0.callback.borrow_mut() = Some(callback);
        }
        Some(result)
    }

    /// Invoke and resolve the reply into a status.
    pub(crate) fn run_once(&self) -> Result<TaskStatus, SchedulerError> {
        let Some(result) = self.invoke() else {
            return Ok(TaskStatus::Done);
        };
        let reply = result.map_err(|source| SchedulerError::TaskFault {
            name: self.name().to_string(),
            source,
        })?;
        reply.status().map_err(|code| SchedulerError::UnknownStatus {
            name: self.name().to_string(),
            code,
        })
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskHandle {}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("sort", &self.0.sort)
            .field("residence", &self.0.residence.get())
            .field("removed", &self.0.removed.get())
            .finish()
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task id: {}, name {}", self.0.id, self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        hits: Cell<u32>,
    }

    fn count_up(receiver: &dyn Any, _call: &Invocation<'_>) -> TaskResult {
        let counter = receiver.downcast_ref::<Counter>().expect("receiver is a Counter");
        counter.hits.set(counter.hits.get() + 1);
        Ok(TaskStatus::Cont.into())
    }

    fn count_twice(receiver: &dyn Any, _call: &Invocation<'_>) -> TaskResult {
        let counter = receiver.downcast_ref::<Counter>().expect("receiver is a Counter");
        counter.hits.set(counter.hits.get() + 2);
        Ok(TaskStatus::Cont.into())
    }

    #[test]
    fn codons_are_stable_abi() {
        assert_eq!(TaskStatus::Done as i32, 0);
        assert_eq!(TaskStatus::Cont as i32, 1);
        assert_eq!(TaskStatus::Again as i32, 2);
        assert_eq!(TaskStatus::Exit as i32, -1);
        assert_eq!(TaskStatus::try_from(2), Ok(TaskStatus::Again));
        assert_eq!(TaskStatus::try_from(7), Err(7));
    }

    #[test]
    fn reply_resolution() {
        assert_eq!(Reply::Nothing.status(), Ok(TaskStatus::Done));
        assert_eq!(Reply::Code(1).status(), Ok(TaskStatus::Cont));
        assert_eq!(Reply::Code(42).status(), Err(42));
        assert_eq!(Reply::from(None::<TaskStatus>), Reply::Nothing);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = TaskSpec::new("a", |_| TaskStatus::Done).detached();
        let b = TaskSpec::new("b", |_| TaskStatus::Done).detached();
        assert!(b.id() > a.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn append_task_defaults_follow_extra_args() {
        let without = TaskSpec::new("a", |_| ()).detached();
        assert!(without.append_task());

        let with = TaskSpec::new("b", |_| ()).extra_args(vec![Value::from(1)]).detached();
        assert!(!with.append_task());

        let forced = TaskSpec::new("c", |_| ())
            .extra_args(vec![Value::from(1)])
            .append_task(true)
            .detached();
        assert!(forced.append_task());
    }

    #[test]
    fn invocation_exposes_args_and_handle() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let task = TaskSpec::new("args", move |call: &Invocation<'_>| {
            sink.borrow_mut().push((call.args().to_vec(), call.task().map(|t| t.id())));
            TaskStatus::Cont
        })
        .extra_args(vec![Value::from("x"), Value::from(3)])
        .append_task(true)
        .detached();

        assert_eq!(task.run_once().unwrap(), TaskStatus::Cont);
        let seen = seen.borrow();
        assert_eq!(seen[0].0, vec![Value::from("x"), Value::from(3)]);
        assert_eq!(seen[0].1, Some(task.id()));
    }

    #[test]
    fn remove_is_idempotent_and_notifies_owner_once() {
        struct Owner {
            cleared: Cell<u32>,
        }
        impl TaskOwner for Owner {
            fn clear_task(&self, _task: &TaskHandle) {
                self.cleared.set(self.cleared.get() + 1);
            }
        }

        let owner = Rc::new(Owner { cleared: Cell::new(0) });
        let task = TaskSpec::new("owned", |_| TaskStatus::Cont)
            .owner(owner.clone())
            .detached();

        assert!(task.is_alive());
        assert!(task.remove());
        assert!(!task.remove());
        assert!(!task.is_alive());
        assert_eq!(owner.cleared.get(), 1);
        // the callback is gone, so running it is a no-op DONE
        assert_eq!(task.run_once().unwrap(), TaskStatus::Done);
    }

    #[test]
    fn task_removing_itself_drops_callback() {
        let task = TaskSpec::new("self-remove", |call: &Invocation<'_>| {
            call.this().remove();
            TaskStatus::Cont
        })
        .detached();
        assert_eq!(task.run_once().unwrap(), TaskStatus::Cont);
        assert!(task.invoke().is_none());
    }

    #[test]
    fn unknown_code_and_fault_are_errors() {
        let bad = TaskSpec::new("bad", |_| 9).detached();
        assert!(matches!(
            bad.run_once(),
            Err(SchedulerError::UnknownStatus { code: 9, .. })
        ));

        let faulty =
            TaskSpec::new("faulty", |_| -> anyhow::Result<TaskStatus> { anyhow::bail!("boom") })
                .detached();
        let err = faulty.run_once().unwrap_err();
        assert!(matches!(err, SchedulerError::TaskFault { ref name, .. } if name == "faulty"));
        assert!(faulty.is_alive());
    }

    #[test]
    fn bound_methods_can_be_replaced() {
        let counter = Rc::new(Counter { hits: Cell::new(0) });
        let task = TaskSpec::bound("counter", counter.clone(), count_up).detached();

        task.run_once().unwrap();
        assert_eq!(counter.hits.get(), 1);

        assert!(!task.replace_method(count_twice, count_up));
        assert!(task.replace_method(count_up, count_twice));
        task.run_once().unwrap();
        assert_eq!(counter.hits.get(), 3);
    }

    #[test]
    fn time_and_frame_are_relative_to_start() {
        let task = TaskSpec::new("t", |_| ()).detached();
        task.set_start_time_frame(10.0, 5);
        task.set_current_time_frame(12.5, 8);
        assert_eq!(task.time(), 2.5);
        assert_eq!(task.frame(), 3);
    }

    #[test]
    fn stats_average_over_samples() {
        let mut stats = TaskStats::default();
        stats.record(0.2);
        assert_eq!(stats.avg_dt, 0.2);
        stats.record(0.4);
        assert!((stats.avg_dt - 0.3).abs() < 1e-12);
        assert_eq!(stats.max_dt, 0.4);
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn name_pattern_strips_digits() {
        let task = TaskSpec::new("enemy-12-ai", |_| ()).detached();
        assert_eq!(task.name_pattern(), "enemy--ai");
    }
}
