//! Ready-count tracker for quiescence detection.

use std::sync::atomic::{AtomicI32, Ordering};

/// Counter of runnable tasks that have been pushed to a ready queue and not
/// yet fully completed.
///
/// Every ready-queue push increments the count and every concluded
/// execution (finished or respawned) decrements it, pairing 1:1. The graph
/// has drained once the count reaches zero. Tasks parked in a wait list
/// contribute nothing; their eventual push is what keeps the count above
/// zero while the graph is still live.
#[derive(Debug)]
pub struct ReadyCount {
    active: AtomicI32,
}

impl ReadyCount {
    /// Create a tracker with no active tasks.
    #[inline]
    pub fn new() -> Self {
        Self {
            active: AtomicI32::new(0),
        }
    }

    /// Record one task entering a ready queue.
    #[inline]
    pub fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one task execution concluding. Pairs with a prior
    /// [`increment`](Self::increment).
    #[inline]
    pub fn decrement(&self) {
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "ready count decremented below zero");
    }

    /// Whether no runnable task is currently ready or running.
    ///
    /// The read is not linearized with the rest of the queue state; during a
    /// respawn the count transiently overstates by one, never understates,
    /// so quiescence is never signalled early.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0
    }

    /// Current number of active tasks.
    #[inline]
    pub fn active(&self) -> i32 {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for ReadyCount {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReadyCount {
    fn drop(&mut self) {
        // A nonzero count at teardown means a task was leaked or never
        // completed; that is a programming error, not a recoverable state.
        if !std::thread::panicking() {
            assert_eq!(
                *self.active.get_mut(),
                0,
                "ready count nonzero at teardown"
            );
        }
    }
}
