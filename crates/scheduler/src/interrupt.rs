//! Deferred keyboard interrupts.
//!
//! While a frame is running, an interrupt is held back until the frame
//! finishes so task state is never left half-updated. A second interrupt
//! during the same frame is logged; a third asks the host to abort
//! immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{info, warn};

/// What the host should do after raising an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// No frame was running; the loop stops before the next frame.
    Immediate,
    /// First interrupt during a frame; it fires when the frame ends.
    Deferred,
    /// Second interrupt during a frame; still waiting.
    Escalated,
    /// Third or later; the host should terminate now.
    Abort,
}

#[derive(Debug, Default)]
struct InterruptState {
    /// A frame is in progress.
    armed: AtomicBool,
    /// Interrupts received during the current frame.
    count: AtomicUsize,
    pending: AtomicBool,
}

/// Thread-safe handle for delivering interrupts to a task manager.
///
/// Cloned into signal handlers; the manager checks it between frames.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    inner: Arc<InterruptState>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) -> InterruptAction {
        self.inner.pending.store(true, Ordering::SeqCst);
        if !self.inner.armed.load(Ordering::SeqCst) {
            return InterruptAction::Immediate;
        }
        match self.inner.count.fetch_add(1, Ordering::SeqCst) + 1 {
            1 => {
                info!("interrupt received, finishing current frame");
                InterruptAction::Deferred
            }
            2 => {
                warn!("interrupt received again, still waiting for the end of the frame");
                InterruptAction::Escalated
            }
            _ => InterruptAction::Abort,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Clear and return the pending flag.
    pub fn take_pending(&self) -> bool {
        self.inner.pending.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn arm(&self) {
        self.inner.count.store(0, Ordering::SeqCst);
        self.inner.armed.store(true, Ordering::SeqCst);
    }

    /// End of frame. Returns whether an interrupt is waiting to be delivered.
    pub(crate) fn disarm(&self) -> bool {
        self.inner.armed.store(false, Ordering::SeqCst);
        self.inner.count.store(0, Ordering::SeqCst);
        self.take_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_frames_is_immediate() {
        let token = InterruptToken::new();
        assert_eq!(token.raise(), InterruptAction::Immediate);
        assert!(token.is_pending());
        assert!(token.take_pending());
        assert!(!token.is_pending());
    }

    #[test]
    fn escalates_within_a_frame() {
        let token = InterruptToken::new();
        token.arm();
        assert_eq!(token.raise(), InterruptAction::Deferred);
        assert_eq!(token.raise(), InterruptAction::Escalated);
        assert_eq!(token.raise(), InterruptAction::Abort);
        assert!(token.disarm());
        assert!(!token.disarm());
    }

    #[test]
    fn count_resets_each_frame() {
        let token = InterruptToken::new();
        token.arm();
        token.raise();
        token.disarm();
        token.arm();
        assert_eq!(token.raise(), InterruptAction::Deferred);
    }

    #[test]
    fn clones_share_state() {
        let token = InterruptToken::new();
        let handler = token.clone();
        token.arm();
        handler.raise();
        assert!(token.disarm());
    }
}
