//! End-of-frame yield policies.

use std::time::Duration;

use cadence_core::Clock;

/// Below this many seconds of slack, sleeping is not worth it.
const MIN_SLEEP: f64 = 0.002;

/// Called once at the end of every frame with the real time the frame
/// started and the earliest deferred wake time, if any.
pub trait YieldPolicy {
    fn yield_frame(&mut self, clock: &dyn Clock, frame_start: f64, next_wake: Option<f64>);
}

/// Return immediately; the host paces frames itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoYield;

impl YieldPolicy for NoYield {
    fn yield_frame(&mut self, _clock: &dyn Clock, _frame_start: f64, _next_wake: Option<f64>) {}
}

/// Sleep off the rest of the frame budget, waking early for a deferred
/// task that is due sooner.
#[derive(Debug, Clone, Copy)]
pub struct EpochLimiter {
    max_epoch: f64,
}

impl EpochLimiter {
    pub fn new(max_epoch: f64) -> Self {
        Self { max_epoch }
    }

    /// Real time to sleep until.
    pub fn target(&self, frame_start: f64, next_wake: Option<f64>) -> f64 {
        let budget = frame_start + self.max_epoch;
        match next_wake {
            Some(wake) => budget.min(wake),
            None => budget,
        }
    }
}

impl YieldPolicy for EpochLimiter {
    fn yield_frame(&mut self, clock: &dyn Clock, frame_start: f64, next_wake: Option<f64>) {
        let target = self.target(frame_start, next_wake);
        let mut now = clock.real_time();
        while target - now > MIN_SLEEP {
            std::thread::sleep(Duration::from_secs_f64(target - now));
            let after = clock.real_time();
            // a clock that does not follow the wall (e.g. in tests) would spin
            if after <= now {
                break;
            }
            now = after;
        }
    }
}

/// Adapts a closure into a [`YieldPolicy`].
pub struct YieldFn<F>(pub F);

impl<F> YieldPolicy for YieldFn<F>
where
    F: FnMut(f64, Option<f64>),
{
    fn yield_frame(&mut self, _clock: &dyn Clock, frame_start: f64, next_wake: Option<f64>) {
        (self.0)(frame_start, next_wake)
    }
}
