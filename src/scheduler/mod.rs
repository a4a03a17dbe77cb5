//! Completion and scheduling protocol for dependency-graph tasks.
//!
//! The protocol is written once, here, and specialized by any concrete
//! queue that supplies three primitives: a ready-queue `push_ready`, a
//! `deallocate` that returns task storage to its pool, and access to the
//! queue's [`ReadyCount`]. The provided methods implement everything else:
//! completing a finished or respawning task, completing an aggregate once
//! its join is satisfied, resolving a runnable task's predecessor, and
//! resolving an aggregate's predecessor list.
//!
//! Workers never block inside the protocol. A task that cannot proceed is
//! left linked into its predecessor's wait list and the calling worker
//! returns immediately; whichever worker later completes that predecessor
//! picks the task back up.

pub mod ready_count;

pub use self::ready_count::ReadyCount;

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::task::{TaskNode, TaskRef, TaskState};

/// Completion and scheduling behavior over a concrete task queue.
///
/// Implementers supply the three primitives; the protocol methods come for
/// free. Waiter wakeups cascade by synchronous recursion, so a pathological
/// dependency chain consumes call-stack depth proportional to its length.
pub trait SchedulingQueue {
    /// The queue's ready-count tracker.
    fn ready_count(&self) -> &ReadyCount;

    /// Insert a ready task into the concrete ready queue. Storage and
    /// ordering policy belong to the implementer.
    fn push_ready(&self, task: TaskRef);

    /// Return a fully released task's storage to its pool.
    fn deallocate(&self, node: TaskNode);

    /// Whether no runnable task is currently ready or running.
    #[inline]
    fn is_done(&self) -> bool {
        self.ready_count().is_done()
    }

    /// Conclude a popped runnable task whose body has returned.
    ///
    /// A task that requested a respawn goes back through predecessor
    /// resolution; anything else is finalized and its waiters are woken.
    /// Either way the ready count is decremented exactly once, pairing the
    /// increment from this task's last ready-queue push. On the respawn
    /// branch the scheduling call has already re-incremented, so the count
    /// transiently overstates and never dips to a false zero.
    fn complete_runnable(&self, task: TaskRef) {
        debug_assert!(task.is_runnable());
        if task.respawn_requested() {
            self.schedule_runnable(task);
        } else {
            finish_task(self, task);
        }
        self.ready_count().decrement();
    }

    /// Conclude an aggregate whose dependences have all resolved.
    ///
    /// Aggregates never respawn and were never counted ready, so this
    /// finalizes unconditionally and leaves the ready count alone.
    fn complete_aggregate(&self, task: TaskRef) {
        debug_assert!(!task.is_runnable());
        finish_task(self, task);
    }

    /// Resolve a runnable task's predecessor and either enqueue it as ready
    /// or park it on the predecessor's wait list.
    ///
    /// Invoked for a freshly spawned task and again for every respawn.
    fn schedule_runnable(&self, task: TaskRef) {
        debug_assert!(task.is_runnable());
        let mut ready = true;

        // The respawn that led here, if any, is handled by this call; clear
        // the flag while access is still exclusive. After a successful
        // append another worker may re-run the task at any moment, and a
        // late clear would erase a respawn requested by that run.
        task.set_respawn(false);

        // Single-owner access: only this call touches the task's own slot.
        if let Some(predecessor) = task.take_predecessor() {
            // Publish the cleared slot before racing with the predecessor's
            // completion path.
            fence(Ordering::SeqCst);

            task.set_state(TaskState::Waiting);
            let predecessor_pending = predecessor.try_add_waiting(Arc::clone(&task)).is_ok();
            ready = !predecessor_pending;
            trace!(
                task = %task.id(),
                predecessor = %predecessor.id(),
                pending = predecessor_pending,
                "resolved predecessor"
            );

            // The slot's reference kept the predecessor alive across the
            // append attempt; it can only be released now.
            release_ref(self, predecessor);
        }

        if ready {
            task.set_state(TaskState::Ready);
            self.ready_count().increment();
            self.push_ready(task);
        }
        // Otherwise the wait list owns the surviving handle and another
        // worker may already be processing the task; our handle drops here.
    }

    /// Resolve an aggregate's remaining dependences, parking it on the
    /// first still-pending predecessor or completing it if none remain.
    ///
    /// Slots are scanned last-to-first. The scan stops at the first pending
    /// predecessor and leaves earlier slots occupied, so the next wakeup
    /// resumes where this one stopped: at most one append attempt per
    /// predecessor over the aggregate's lifetime.
    fn schedule_aggregate(&self, task: TaskRef) {
        debug_assert!(!task.is_runnable());
        task.set_state(TaskState::Waiting);
        let mut pending_found = false;

        for slot in task.dependence_slots().iter().rev() {
            // Already resolved by an earlier scan.
            let Some(predecessor) = slot.lock().take() else {
                continue;
            };

            pending_found = predecessor.try_add_waiting(Arc::clone(&task)).is_ok();
            trace!(
                task = %task.id(),
                predecessor = %predecessor.id(),
                pending = pending_found,
                "resolved aggregate dependence"
            );

            // The slot's reference on the predecessor is released whether
            // the predecessor was pending or already done.
            release_ref(self, predecessor);

            if pending_found {
                break;
            }
        }

        if !pending_found {
            self.complete_aggregate(task);
        }
    }
}

/// Finalize a task: wake its waiters, then release the scheduler's own
/// reference, deallocating on zero.
fn finish_task<Q: SchedulingQueue + ?Sized>(queue: &Q, task: TaskRef) {
    trace!(task = %task.id(), "task finished");
    task.set_state(TaskState::Finished);

    // Closing the wait list is the point of no return: append attempts fail
    // from here on and late arrivals schedule themselves as ready. Each
    // drained waiter may complete further tasks recursively if its remaining
    // dependences are already satisfied.
    task.consume_wait_queue(|waiter| {
        if waiter.is_runnable() {
            queue.schedule_runnable(waiter);
        } else {
            queue.schedule_aggregate(waiter);
        }
    });

    release_ref(queue, task);
}

/// Release one reference to `task`; if it was the last, hand the node back
/// to the queue's pool.
fn release_ref<Q: SchedulingQueue + ?Sized>(queue: &Q, task: TaskRef) {
    if let Some(node) = Arc::into_inner(task) {
        queue.deallocate(node);
    }
}

#[cfg(test)]
mod tests;
