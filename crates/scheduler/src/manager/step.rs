//! The per-frame engine.
//!
//! A frame walks the active buckets in ascending sort. After each bucket,
//! tasks added at that same sort are walked as a staged batch, then all
//! other pending tasks are folded in, so a task added mid-frame runs this
//! frame exactly when its sort is above the bucket being walked.

use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, trace, warn};

use crate::buckets::Bucket;
use crate::error::SchedulerError;
use crate::events::TaskEvent;
use crate::task::{Residence, TaskHandle, TaskStatus};

use super::core::{State, TaskManager};

/// Frame rates below this are treated as unknown.
const MIN_FRAME_RATE: f64 = 1e-5;

#[derive(Debug, Clone, Copy)]
enum Lane {
    Active(i32),
    Staged,
}

impl State {
    fn lane(&self, lane: Lane) -> Option<&Bucket> {
        match lane {
            Lane::Active(sort) => self.buckets.bucket(sort),
            Lane::Staged => self.staged.as_ref(),
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> Option<&mut Bucket> {
        match lane {
            Lane::Active(sort) => self.buckets.bucket_mut(sort),
            Lane::Staged => self.staged.as_mut(),
        }
    }
}

impl TaskManager {
    /// Run one frame.
    ///
    /// A task fault propagates out after the frame's bookkeeping is done;
    /// the faulting task stays scheduled. An interrupt raised during the
    /// frame is delivered as [`SchedulerError::Interrupted`] once it ends.
    pub fn step(&self) -> Result<(), SchedulerError> {
        self.ensure_alive()?;
        let clock = Rc::clone(&self.shared.clock);
        {
            let mut st = self.state_mut();
            if st.in_step {
                return Err(SchedulerError::ReentrantStep);
            }
            st.in_step = true;
            clock.begin_frame();
            st.current_time = clock.frame_time();
            st.current_frame = clock.frame_count();
            st.frame_stamp = Utc::now();
        }
        let frame_start = clock.real_time();
        self.shared.interrupt.arm();

        // tasks added between frames join at the top of this one
        self.promote_pending();
        let result = self.walk_buckets();
        self.promote_staged();
        self.promote_pending();

        let next_wake = {
            let mut st = self.state_mut();
            st.in_step = false;
            st.metrics.frames += 1;
            if result.is_err() {
                st.metrics.faults += 1;
            }
            st.buckets.prune();
            st.deferred.next_wake()
        };
        if result.is_ok() {
            self.shared
                .yield_policy
                .borrow_mut()
                .yield_frame(clock.as_ref(), frame_start, next_wake);
        }

        let interrupted = self.shared.interrupt.disarm();
        result?;
        if interrupted {
            return Err(SchedulerError::Interrupted);
        }
        Ok(())
    }

    /// Step frames until stopped, interrupted or destroyed.
    ///
    /// Re-aligns the clock and calls the resume hook first. In stepping mode
    /// a single frame is run. With `extended_exceptions`, a task fault is
    /// logged and ends the loop instead of being returned.
    pub fn run(&self) -> Result<(), SchedulerError> {
        self.ensure_alive()?;
        if let Some(delta) = self.shared.clock.reset_real_time() {
            debug!(delta, "clock re-aligned");
            self.publish(TaskEvent::ClockReset { delta });
        }
        self.call_resume_hook();

        if self.shared.config.stepping {
            return self.step();
        }

        self.shared.running.set(true);
        info!("task manager running");
        while self.shared.running.get() && !self.is_destroyed() {
            if self.shared.interrupt.take_pending() {
                info!("interrupted between frames, stopping");
                break;
            }
            let frames = self.state_mut().profile_frames.take();
            let result = match frames {
                Some(frames) => self.profile_frames_now(frames),
                None => self.step(),
            };
            match result {
                Ok(()) => {}
                Err(SchedulerError::Interrupted) => {
                    info!("interrupted, stopping");
                    break;
                }
                Err(SchedulerError::TaskFault { name, source })
                    if self.shared.config.extended_exceptions =>
                {
                    error!(task = %name, error = ?source, "task fault, stopping");
                    break;
                }
                Err(err) => {
                    self.shared.running.set(false);
                    return Err(err);
                }
            }
        }
        self.shared.running.set(false);
        info!("task manager stopped");
        Ok(())
    }

    /// Ask `run()` to return after the current frame.
    pub fn stop(&self) {
        self.shared.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.get()
    }

    /// Wake due deferred tasks into pending staging, reaping removed ones;
    /// with `sweep`, also drop every removed entry still in the queue.
    pub(super) fn process_do_laters(&self, sweep: bool) {
        let now = self.shared.clock.frame_time();
        let (woken, reaped) = {
            let mut st = self.state_mut();
            let (start_time, start_frame) = (st.current_time, st.current_frame);
            let drained = st.deferred.drain_due(now);
            for task in &drained.woken {
                // re-queued tasks keep their original start
                if !task.has_started() {
                    task.set_start_time_frame(start_time, start_frame);
                }
                task.set_residence(Residence::Pending);
                st.pending.entry(task.sort()).or_default().push(task.clone());
            }
            let mut reaped = drained.reaped;
            if sweep {
                reaped.extend(st.deferred.sweep());
            }
            (drained.woken.len(), reaped)
        };

        for task in &reaped {
            self.retire(task);
        }
        if woken > 0 || !reaped.is_empty() {
            trace!(woken, reaped = reaped.len(), sweep, "deferred tasks processed");
        }
    }

    pub(super) fn promote_pending(&self) {
        let pending = std::mem::take(&mut self.state_mut().pending);
        self.fold_in(pending.into_values().flatten().collect());
    }

    fn promote_staged(&self) {
        let staged = self.state_mut().staged.take();
        if let Some(mut bucket) = staged {
            self.fold_in(bucket.drain());
        }
    }

    /// Move tasks into the active buckets, reaping any flagged removed.
    fn fold_in(&self, tasks: Vec<TaskHandle>) {
        if tasks.is_empty() {
            return;
        }
        let mut reaped = Vec::new();
        let mut spawned = Vec::new();
        {
            let mut st = self.state_mut();
            for task in tasks {
                if task.is_removed() {
                    reaped.push(task);
                    continue;
                }
                if task.mark_spawned() && !st.is_internal(&task) {
                    spawned.push(task.clone());
                }
                st.buckets.add(task);
            }
        }
        for task in &reaped {
            self.retire(task);
        }
        for task in spawned {
            self.publish(TaskEvent::Spawn(task));
        }
    }

    fn walk_buckets(&self) -> Result<(), SchedulerError> {
        let mut cursor = None;
        loop {
            let next = self.state().buckets.next_sort_after(cursor);
            let Some(sort) = next else {
                return Ok(());
            };
            cursor = Some(sort);

            self.walk(Lane::Active(sort))?;
            while self.stage(sort) {
                self.walk(Lane::Staged)?;
                self.promote_staged();
            }
            self.promote_pending();
        }
    }

    /// Move pending tasks with exactly `sort` into the staged lane.
    fn stage(&self, sort: i32) -> bool {
        let mut st = self.state_mut();
        match st.pending.remove(&sort) {
            Some(tasks) => {
                st.staged = Some(Bucket::from_tasks(sort, tasks));
                true
            }
            None => false,
        }
    }

    fn walk(&self, lane: Lane) -> Result<(), SchedulerError> {
        let mut index = 0;
        loop {
            let task = {
                let st = self.state();
                st.lane(lane).and_then(|bucket| bucket.get(index)).cloned()
            };
            let Some(task) = task else {
                return Ok(());
            };

            if task.is_removed() {
                self.vacate(lane, index, &task);
                self.retire(&task);
                continue;
            }

            let status = self.execute(&task)?;

            if task.is_removed() {
                self.vacate(lane, index, &task);
                self.retire(&task);
                continue;
            }
            match status {
                TaskStatus::Cont => index += 1,
                TaskStatus::Again => {
                    self.vacate(lane, index, &task);
                    self.requeue(&task);
                }
                TaskStatus::Done => {
                    self.vacate(lane, index, &task);
                    self.retire(&task);
                }
                TaskStatus::Exit => {
                    debug!(task_id = task.id(), task = task.name(), "task exited");
                    self.vacate(lane, index, &task);
                    self.retire(&task);
                }
            }
        }
    }

    /// Swap-remove `task` from `index` if it is still there.
    fn vacate(&self, lane: Lane, index: usize, task: &TaskHandle) {
        let mut st = self.state_mut();
        if let Some(bucket) = st.lane_mut(lane) {
            if bucket.get(index) == Some(task) {
                bucket.swap_remove(index);
            }
        }
    }

    fn requeue(&self, task: &TaskHandle) {
        let now = self.shared.clock.frame_time();
        let verbose = {
            let mut st = self.state_mut();
            st.deferred.push(task, now);
            st.verbose
        };
        if verbose {
            self.publish(TaskEvent::Again(task.clone()));
        }
    }

    /// Invoke a task once with timing, profiling and the duration check.
    fn execute(&self, task: &TaskHandle) -> Result<TaskStatus, SchedulerError> {
        let clock = Rc::clone(&self.shared.clock);
        let profile = {
            let st = self.state();
            task.set_current_time_frame(st.current_time, st.current_frame);
            st.profile_info.task_id == Some(task.id()) && !task.profiled()
        };
        let session = if profile {
            let label = format!("task {}", task.name());
            Some(self.shared.profiler.borrow().start(&label))
        } else {
            None
        };

        let started = clock.short_time();
        let result = task.run_once();
        let mut dt = clock.short_time() - started;
        let report = session.map(|session| session.finish());

        {
            let mut st = self.state_mut();
            if let Some(report) = report {
                task.set_profiled(true);
                st.profile_info.dt = Some(dt);
                st.profile_info.last_result = Some(report);
                // keep profiler overhead out of the running stats
                dt = task.stats().avg_dt;
            }
            let stamp = st.frame_stamp;
            st.metrics.record_execution(
                task.name(),
                Duration::try_from_secs_f64(dt).unwrap_or_default(),
                stamp,
            );
        }
        task.record_dt(dt);
        self.check_duration(task, dt);
        result
    }

    fn check_duration(&self, task: &TaskHandle, dt: f64) {
        let config = &self.shared.config;
        if !config.warn_task_duration || task.frame() == 0 {
            return;
        }
        let rate = self.shared.clock.average_frame_rate();
        if rate <= MIN_FRAME_RATE {
            return;
        }
        let avg_frame = 1.0 / rate;
        if dt >= config.task_duration_warning_threshold * avg_frame {
            warn!(
                task = task.name(),
                dt,
                avg_frame,
                "task ran {:.1}x longer than an average frame",
                dt / avg_frame
            );
        }
    }

    fn profile_frames_now(&self, frames: u32) -> Result<(), SchedulerError> {
        let session = self.shared.profiler.borrow().start(&format!("{frames} frames"));
        info!(frames, "profiling frames");
        let result = (0..frames).try_for_each(|_| self.step());
        let report = session.finish();
        info!(report = %report, "frame profile complete");
        self.state_mut().profile_info.frames_result = Some(report);
        result
    }

    fn call_resume_hook(&self) {
        let hook = self.shared.resume_hook.borrow_mut().take();
        if let Some(mut hook) = hook {
            hook();
            let mut slot = self.shared.resume_hook.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        }
    }
}
