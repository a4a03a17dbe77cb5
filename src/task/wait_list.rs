//! Lock-free waiter list attached to every task.
//!
//! Tasks blocked on a predecessor are linked into the predecessor's
//! `WaitList` through the intrusive `next_waiting` pointer on `TaskNode`.
//! The list head doubles as the task's completion flag: once the owning
//! task finishes, the head is swapped to a closed sentinel and all further
//! append attempts are refused. The append/close pair is the only
//! cross-thread contention point in the scheduling protocol, so it is
//! implemented with compare-and-swap rather than a lock.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;

use super::{TaskNode, TaskRef};

/// Sentinel head value marking the list as closed. Address 1 can never be
/// the address of a live `TaskNode`, which is always at least word-aligned.
const CLOSED: *mut TaskNode = 1 as *mut TaskNode;

/// Intrusive, concurrently-appendable list of tasks waiting on the owner's
/// completion.
///
/// A null head is an open, empty list. Appends push at the head (LIFO), so
/// each entry's `next_waiting` link points at the previously appended task.
/// A task is a member of at most one wait list at a time.
#[derive(Debug)]
pub(crate) struct WaitList {
    head: AtomicPtr<TaskNode>,
}

impl WaitList {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Whether the owning task has completed and the list no longer accepts
    /// waiters.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        ptr::eq(self.head.load(Ordering::Acquire), CLOSED)
    }

    /// Try to append `task` as a waiter.
    ///
    /// On success the list takes ownership of the handle and the caller must
    /// not touch the task again; the owner's completion will hand it back to
    /// the scheduler. If the owner has already completed, the handle is
    /// returned in `Err` and the caller must treat the task as ready.
    pub(crate) fn try_push(&self, task: TaskRef) -> Result<(), TaskRef> {
        let node = Arc::as_ptr(&task) as *mut TaskNode;
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if ptr::eq(head, CLOSED) {
                return Err(task);
            }
            // The link must be in place before the CAS publishes the node.
            task.next_waiting.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => {
                    // The list owns the handle from here on.
                    std::mem::forget(task);
                    return Ok(());
                }
                Err(observed) => {
                    head = observed;
                    backoff.spin();
                }
            }
        }
    }

    /// Close the list and hand every waiter to `visit`, in LIFO order.
    ///
    /// Called exactly once, by the single caller completing the owning task.
    /// The next-link is read before the visitor runs because the visitor may
    /// immediately re-link the waiter into another list.
    pub(crate) fn close_and_drain<F>(&self, mut visit: F)
    where
        F: FnMut(TaskRef),
    {
        let mut cur = self.head.swap(CLOSED, Ordering::AcqRel);
        debug_assert!(!ptr::eq(cur, CLOSED), "wait list closed twice");
        while !cur.is_null() && !ptr::eq(cur, CLOSED) {
            // Safety: `cur` was produced by `Arc::as_ptr` in `try_push` and
            // the list held the handle ownership since then.
            let task = unsafe { Arc::from_raw(cur) };
            let next = task.next_waiting.swap(ptr::null_mut(), Ordering::Relaxed);
            visit(task);
            cur = next;
        }
    }
}

impl Drop for WaitList {
    fn drop(&mut self) {
        // Release any handles still linked in. Reached only when the owning
        // task is torn down before completing, e.g. an abandoned graph.
        let mut cur = *self.head.get_mut();
        while !cur.is_null() && !ptr::eq(cur, CLOSED) {
            // Safety: same ownership argument as in `close_and_drain`.
            let task = unsafe { Arc::from_raw(cur) };
            cur = task.next_waiting.load(Ordering::Relaxed);
            drop(task);
        }
    }
}
