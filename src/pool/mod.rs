//! Task admission and live-task accounting.
//!
//! The pool bounds how many task allocations may be live at once and
//! observes every reclamation the scheduler performs. Storage itself comes
//! from the global allocator; the pool's job is admission control and
//! bookkeeping, which is all the completion protocol requires of it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::task::TaskNode;

/// Error admitting a new task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The pool's live-task capacity is exhausted.
    #[error("task pool exhausted ({live}/{capacity} live tasks)")]
    PoolExhausted {
        /// Live tasks at the time of the failed reservation.
        live: usize,
        /// Configured capacity.
        capacity: usize,
    },
}

#[derive(Debug, Default)]
struct PoolShared {
    live: AtomicUsize,
    reclaimed: AtomicUsize,
}

/// Capacity-bounded accounting for task allocations.
#[derive(Debug)]
pub struct TaskPool {
    shared: Arc<PoolShared>,
    capacity: usize,
}

impl TaskPool {
    /// Create a pool admitting at most `capacity` live tasks.
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared::default()),
            capacity,
        }
    }

    /// Reserve room for one task.
    ///
    /// The returned ticket rides inside the task node and gives the slot
    /// back when the node is dropped, on any path.
    pub fn reserve(&self) -> Result<PoolTicket, SpawnError> {
        let mut live = self.shared.live.load(Ordering::SeqCst);
        loop {
            if live >= self.capacity {
                return Err(SpawnError::PoolExhausted {
                    live,
                    capacity: self.capacity,
                });
            }
            match self.shared.live.compare_exchange_weak(
                live,
                live + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Ok(PoolTicket {
                        shared: Arc::clone(&self.shared),
                    })
                }
                Err(observed) => live = observed,
            }
        }
    }

    /// Consume a fully released task node, recording the reclamation.
    pub fn reclaim(&self, node: TaskNode) {
        trace!(task = %node.id(), "task storage reclaimed");
        self.shared.reclaimed.fetch_add(1, Ordering::SeqCst);
        drop(node);
    }

    /// Number of currently live tasks.
    #[inline]
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Number of nodes reclaimed through the scheduler.
    #[inline]
    pub fn reclaimed(&self) -> usize {
        self.shared.reclaimed.load(Ordering::SeqCst)
    }

    /// Configured capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        let live = self.live();
        if live != 0 {
            // Outstanding user handles keep their nodes alive past the pool;
            // the tickets they carry still settle the count when dropped.
            debug!(live, "task pool dropped with live tasks outstanding");
        }
    }
}

/// RAII handle for one reserved pool slot.
#[derive(Debug)]
pub struct PoolTicket {
    shared: Arc<PoolShared>,
}

impl Drop for PoolTicket {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}
