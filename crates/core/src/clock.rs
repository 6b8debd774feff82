//! Clock sources for the frame loop.
//!
//! A [`Clock`] supplies two readings: a frame time that stays constant for
//! the duration of one frame, and a high-resolution "short" time used to
//! measure how long individual tasks run. Engines that have no frame clock
//! use [`TrueClock`], which answers both from the wall clock.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Instant;

/// Number of recent frames used for the rolling average frame rate.
const FRAME_RATE_WINDOW: usize = 64;

/// Time source consulted by the step engine. All readings are seconds.
pub trait Clock {
    /// Time stamp of the current frame; constant between ticks.
    fn frame_time(&self) -> f64;

    /// Number of frames ticked so far.
    fn frame_count(&self) -> u64;

    /// High-resolution wall clock for measuring task durations.
    fn short_time(&self) -> f64;

    /// Wall clock used for frame pacing.
    fn real_time(&self) -> f64 {
        self.short_time()
    }

    /// Rolling average frames per second, or 0.0 when unknown.
    fn average_frame_rate(&self) -> f64 {
        0.0
    }

    /// Re-align real time with frame time after a stall.
    ///
    /// Returns the slip that was corrected, or `None` when the clock has no
    /// separate notion of real time.
    fn reset_real_time(&self) -> Option<f64> {
        None
    }

    /// Called by the step engine at the top of every frame. Clocks that are
    /// advanced by their owner ignore it.
    fn begin_frame(&self) {}
}

/// Rolling window of recent frame durations.
#[derive(Debug, Default)]
struct FrameRate {
    recent: RefCell<VecDeque<f64>>,
}

impl FrameRate {
    fn record(&self, dt: f64) {
        let mut recent = self.recent.borrow_mut();
        if recent.len() == FRAME_RATE_WINDOW {
            recent.pop_front();
        }
        recent.push_back(dt.max(0.0));
    }

    fn average(&self) -> f64 {
        let recent = self.recent.borrow();
        let total: f64 = recent.iter().sum();
        if recent.is_empty() || total <= 0.0 {
            0.0
        } else {
            recent.len() as f64 / total
        }
    }
}

// ── TrueClock ─────────────────────────────────────────────────

/// Wall clock with no engine behind it: frame time is the current wall
/// time, and frames are counted from the step engine's `begin_frame` calls.
///
/// The first frame is frame 0.
#[derive(Debug)]
pub struct TrueClock {
    origin: Instant,
    frames: Cell<u64>,
    frame_started: Cell<Option<f64>>,
    rate: FrameRate,
}

impl TrueClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            frames: Cell::new(0),
            frame_started: Cell::new(None),
            rate: FrameRate::default(),
        }
    }
}

impl Default for TrueClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TrueClock {
    fn frame_time(&self) -> f64 {
        self.short_time()
    }

    fn frame_count(&self) -> u64 {
        self.frames.get()
    }

    fn short_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn average_frame_rate(&self) -> f64 {
        self.rate.average()
    }

    fn begin_frame(&self) {
        let now = self.short_time();
        if let Some(previous) = self.frame_started.replace(Some(now)) {
            self.frames.set(self.frames.get() + 1);
            self.rate.record(now - previous);
        }
    }
}

// ── FrameClock ────────────────────────────────────────────────

/// Engine-style clock advanced once per frame by [`FrameClock::tick`].
///
/// Usually ticked by a high-sort task so every task in the next frame sees
/// the same time stamp.
#[derive(Debug)]
pub struct FrameClock {
    origin: Instant,
    frame_time: Cell<f64>,
    frame_count: Cell<u64>,
    /// Added to the raw wall clock; adjusted by `reset_real_time`.
    real_offset: Cell<f64>,
    rate: FrameRate,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            frame_time: Cell::new(0.0),
            frame_count: Cell::new(0),
            real_offset: Cell::new(0.0),
            rate: FrameRate::default(),
        }
    }

    /// Advance to the next frame, sampling the wall clock.
    pub fn tick(&self) {
        let now = self.real_time();
        let dt = now - self.frame_time.get();
        self.frame_time.set(now);
        self.frame_count.set(self.frame_count.get() + 1);
        self.rate.record(dt);
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FrameClock {
    fn frame_time(&self) -> f64 {
        self.frame_time.get()
    }

    fn frame_count(&self) -> u64 {
        self.frame_count.get()
    }

    fn short_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn real_time(&self) -> f64 {
        self.short_time() + self.real_offset.get()
    }

    fn average_frame_rate(&self) -> f64 {
        self.rate.average()
    }

    fn reset_real_time(&self) -> Option<f64> {
        let delta = self.frame_time.get() - self.real_time();
        self.real_offset.set(self.real_offset.get() + delta);
        Some(delta)
    }
}

// ── ManualClock ───────────────────────────────────────────────

/// Deterministic clock driven entirely by the caller.
///
/// `advance` moves frame time, real time and the frame counter together;
/// `spend` moves only real time, which is how a test simulates a task that
/// takes a while to run.
#[derive(Debug, Default)]
pub struct ManualClock {
    time: Cell<f64>,
    real: Cell<f64>,
    frame: Cell<u64>,
    frame_rate: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at a given time stamp.
    pub fn starting_at(t: f64) -> Self {
        let clock = Self::default();
        clock.time.set(t);
        clock.real.set(t);
        clock
    }

    /// Move to the next frame, `dt` seconds later.
    pub fn advance(&self, dt: f64) {
        self.time.set(self.time.get() + dt);
        self.real.set(self.real.get() + dt);
        self.frame.set(self.frame.get() + 1);
    }

    /// Let wall time pass without starting a new frame.
    pub fn spend(&self, dt: f64) {
        self.real.set(self.real.get() + dt);
    }

    /// Pin the value reported by `average_frame_rate`.
    pub fn set_average_frame_rate(&self, fps: f64) {
        self.frame_rate.set(fps);
    }
}

impl Clock for ManualClock {
    fn frame_time(&self) -> f64 {
        self.time.get()
    }

    fn frame_count(&self) -> u64 {
        self.frame.get()
    }

    fn short_time(&self) -> f64 {
        self.real.get()
    }

    fn average_frame_rate(&self) -> f64 {
        self.frame_rate.get()
    }

    fn reset_real_time(&self) -> Option<f64> {
        let delta = self.time.get() - self.real.get();
        self.real.set(self.time.get());
        Some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_clock_counts_engine_frames() {
        let clock = TrueClock::new();
        assert_eq!(clock.frame_count(), 0);
        assert!(clock.reset_real_time().is_none());
        assert_eq!(clock.average_frame_rate(), 0.0);

        clock.begin_frame();
        assert_eq!(clock.frame_count(), 0);
        std::thread::sleep(std::time::Duration::from_millis(2));
        clock.begin_frame();
        clock.begin_frame();
        assert_eq!(clock.frame_count(), 2);
        assert!(clock.average_frame_rate() > 0.0);
    }

    #[test]
    fn externally_advanced_clocks_ignore_begin_frame() {
        let clock = ManualClock::new();
        clock.begin_frame();
        assert_eq!(clock.frame_count(), 0);
        clock.advance(0.1);
        clock.begin_frame();
        assert_eq!(clock.frame_count(), 1);
    }

    #[test]
    fn frame_clock_holds_time_between_ticks() {
        let clock = FrameClock::new();
        clock.tick();
        let t = clock.frame_time();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(clock.frame_time(), t);
        assert_eq!(clock.frame_count(), 1);

        clock.tick();
        assert!(clock.frame_time() > t);
        assert_eq!(clock.frame_count(), 2);
        assert!(clock.average_frame_rate() > 0.0);
    }

    #[test]
    fn frame_clock_reset_aligns_real_time() {
        let clock = FrameClock::new();
        clock.tick();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let slip = clock.reset_real_time().unwrap();
        assert!(slip < 0.0, "real time ran ahead of frame time, slip={slip}");
        assert!((clock.real_time() - clock.frame_time()).abs() < 0.005);
    }

    #[test]
    fn manual_clock_advance_and_spend() {
        let clock = ManualClock::starting_at(10.0);
        clock.advance(0.5);
        assert_eq!(clock.frame_time(), 10.5);
        assert_eq!(clock.frame_count(), 1);

        clock.spend(0.25);
        assert_eq!(clock.frame_time(), 10.5);
        assert_eq!(clock.short_time(), 10.75);
        assert_eq!(clock.reset_real_time(), Some(-0.25));
        assert_eq!(clock.short_time(), 10.5);
    }
}
