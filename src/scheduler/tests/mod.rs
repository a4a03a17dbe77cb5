//! Scheduler 单元测试
//!
//! 测试就绪计数与完成/调度协议（使用独立的桩队列）

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pool::TaskPool;
use crate::scheduler::{ReadyCount, SchedulingQueue};
use crate::task::{TaskId, TaskNode, TaskRef, TaskState};

/// Minimal LIFO queue proving the protocol is generic over the concrete
/// ready-queue policy.
struct StubQueue {
    ready: Mutex<Vec<TaskRef>>,
    counter: ReadyCount,
    pool: TaskPool,
    deallocated: AtomicUsize,
}

impl StubQueue {
    fn new() -> Self {
        Self {
            ready: Mutex::new(Vec::new()),
            counter: ReadyCount::new(),
            pool: TaskPool::new(64),
            deallocated: AtomicUsize::new(0),
        }
    }

    fn pop(&self) -> Option<TaskRef> {
        self.ready.lock().pop()
    }

    fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    fn deallocated(&self) -> usize {
        self.deallocated.load(Ordering::SeqCst)
    }

    fn runnable(&self, id: usize) -> TaskRef {
        Arc::new(TaskNode::new_runnable(
            TaskId(id),
            self.pool.reserve().unwrap(),
            Box::new(|_cx| {}),
            None,
        ))
    }

    fn runnable_after(&self, id: usize, predecessor: &TaskRef) -> TaskRef {
        Arc::new(TaskNode::new_runnable(
            TaskId(id),
            self.pool.reserve().unwrap(),
            Box::new(|_cx| {}),
            Some(Arc::clone(predecessor)),
        ))
    }

    fn aggregate(&self, id: usize, dependences: &[TaskRef]) -> TaskRef {
        Arc::new(TaskNode::new_aggregate(
            TaskId(id),
            self.pool.reserve().unwrap(),
            dependences,
        ))
    }
}

impl SchedulingQueue for StubQueue {
    fn ready_count(&self) -> &ReadyCount {
        &self.counter
    }

    fn push_ready(&self, task: TaskRef) {
        self.ready.lock().push(task);
    }

    fn deallocate(&self, node: TaskNode) {
        self.deallocated.fetch_add(1, Ordering::SeqCst);
        self.pool.reclaim(node);
    }
}

#[cfg(test)]
mod ready_count_tests {
    use super::*;

    #[test]
    fn test_ready_count_starts_done() {
        let counter = ReadyCount::new();
        assert!(counter.is_done());
        assert_eq!(counter.active(), 0);
    }

    #[test]
    fn test_ready_count_balance() {
        let counter = ReadyCount::new();
        counter.increment();
        counter.increment();
        assert!(!counter.is_done());
        assert_eq!(counter.active(), 2);

        counter.decrement();
        assert!(!counter.is_done());
        counter.decrement();
        assert!(counter.is_done());
    }

    #[test]
    #[should_panic(expected = "ready count nonzero at teardown")]
    fn test_ready_count_teardown_asserts_zero() {
        let counter = ReadyCount::new();
        counter.increment();
        // Dropped with one task still active: a leaked task is fatal.
    }
}

#[cfg(test)]
mod runnable_protocol_tests {
    use super::*;

    #[test]
    fn test_schedule_without_predecessor_is_ready() {
        let queue = StubQueue::new();
        let task = queue.runnable(0);

        queue.schedule_runnable(Arc::clone(&task));
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.counter.active(), 1);

        let popped = queue.pop().unwrap();
        drop(task);
        queue.complete_runnable(popped);

        assert!(queue.is_done());
        assert_eq!(queue.deallocated(), 1);
        assert_eq!(queue.pool.live(), 0);
    }

    #[test]
    fn test_waiter_woken_by_predecessor_completion() {
        let queue = StubQueue::new();
        let first = queue.runnable(0);
        let second = queue.runnable_after(1, &first);

        queue.schedule_runnable(Arc::clone(&first));
        queue.schedule_runnable(Arc::clone(&second));

        // Only the predecessor is ready; the dependent parks on its wait
        // list without touching the ready count.
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.counter.active(), 1);
        assert_eq!(second.state(), TaskState::Waiting);

        let popped = queue.pop().unwrap();
        assert_eq!(popped.id(), first.id());
        drop(first);
        queue.complete_runnable(popped);

        // Completing the predecessor discovered the waiter and pushed it.
        assert_eq!(second.state(), TaskState::Ready);
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.counter.active(), 1);

        let popped = queue.pop().unwrap();
        drop(second);
        queue.complete_runnable(popped);
        assert!(queue.is_done());
        assert_eq!(queue.deallocated(), 2);
    }

    #[test]
    fn test_schedule_after_predecessor_finished_is_ready() {
        let queue = StubQueue::new();
        let first = queue.runnable(0);

        queue.schedule_runnable(Arc::clone(&first));
        let popped = queue.pop().unwrap();
        queue.complete_runnable(popped);
        assert!(first.is_complete());

        // The append attempt fails against the closed wait list, so the
        // dependent is ready immediately.
        let second = queue.runnable_after(1, &first);
        drop(first);
        queue.schedule_runnable(Arc::clone(&second));
        assert_eq!(second.state(), TaskState::Ready);
        assert_eq!(queue.ready_len(), 1);

        let popped = queue.pop().unwrap();
        drop(second);
        queue.complete_runnable(popped);
        assert!(queue.is_done());
        assert_eq!(queue.pool.live(), 0);
    }

    #[test]
    fn test_respawn_reschedules_and_rebalances_count() {
        let queue = StubQueue::new();
        let task = queue.runnable(0);

        queue.schedule_runnable(Arc::clone(&task));
        assert_eq!(queue.counter.active(), 1);

        let popped = queue.pop().unwrap();
        popped.set_respawn(true);
        queue.complete_runnable(popped);

        // Respawned: back in the ready queue, flag cleared, count balanced.
        assert_eq!(queue.counter.active(), 1);
        assert_eq!(queue.ready_len(), 1);
        assert!(!task.respawn_requested());

        let popped = queue.pop().unwrap();
        drop(task);
        queue.complete_runnable(popped);
        assert!(queue.is_done());
        assert_eq!(queue.deallocated(), 1);
    }

    #[test]
    fn test_respawn_with_new_predecessor_waits() {
        let queue = StubQueue::new();
        let gate = queue.runnable(0);
        let task = queue.runnable(1);

        queue.schedule_runnable(Arc::clone(&gate));
        queue.schedule_runnable(Arc::clone(&task));
        assert_eq!(queue.counter.active(), 2);

        // Pop both; respawn `task` against the still-running gate.
        let mut popped_gate = None;
        let mut popped_task = None;
        while let Some(popped) = queue.pop() {
            if popped.id() == gate.id() {
                popped_gate = Some(popped);
            } else {
                popped_task = Some(popped);
            }
        }

        let popped = popped_task.unwrap();
        popped.store_predecessor(Arc::clone(&gate));
        popped.set_respawn(true);
        queue.complete_runnable(popped);

        assert_eq!(task.state(), TaskState::Waiting);
        assert_eq!(queue.counter.active(), 1);

        drop(gate);
        queue.complete_runnable(popped_gate.unwrap());
        assert_eq!(task.state(), TaskState::Ready);

        let popped = queue.pop().unwrap();
        drop(task);
        queue.complete_runnable(popped);
        assert!(queue.is_done());
        assert_eq!(queue.pool.live(), 0);
    }
}

#[cfg(test)]
mod aggregate_protocol_tests {
    use super::*;

    #[test]
    fn test_aggregate_without_dependences_completes_immediately() {
        let queue = StubQueue::new();
        let agg = queue.aggregate(0, &[]);

        queue.schedule_aggregate(Arc::clone(&agg));
        assert!(agg.is_complete());
        assert!(queue.is_done());

        drop(agg);
        assert_eq!(queue.pool.live(), 0);
    }

    #[test]
    fn test_aggregate_parks_on_last_slot_first() {
        let queue = StubQueue::new();
        let first = queue.runnable(0);
        let second = queue.runnable(1);
        queue.schedule_runnable(Arc::clone(&first));
        queue.schedule_runnable(Arc::clone(&second));

        let agg = queue.aggregate(2, &[Arc::clone(&first), Arc::clone(&second)]);
        queue.schedule_aggregate(Arc::clone(&agg));
        assert!(!agg.is_complete());
        assert_eq!(agg.state(), TaskState::Waiting);

        // Completing the first predecessor does not wake the aggregate; it
        // parked on the last slot.
        let popped: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        let by_id = |id: usize| {
            popped
                .iter()
                .find(|task| task.id() == TaskId(id))
                .map(Arc::clone)
                .unwrap()
        };

        queue.complete_runnable(by_id(0));
        assert!(!agg.is_complete());

        queue.complete_runnable(by_id(1));
        assert!(agg.is_complete());

        drop((first, second, agg, popped));
        assert!(queue.is_done());
        assert_eq!(queue.pool.live(), 0);
    }

    #[test]
    fn test_aggregate_wakes_its_own_waiters() {
        let queue = StubQueue::new();
        let pred = queue.runnable(0);
        queue.schedule_runnable(Arc::clone(&pred));

        let agg = queue.aggregate(1, &[Arc::clone(&pred)]);
        queue.schedule_aggregate(Arc::clone(&agg));

        let follower = queue.runnable_after(2, &agg);
        queue.schedule_runnable(Arc::clone(&follower));
        assert_eq!(follower.state(), TaskState::Waiting);

        let popped = queue.pop().unwrap();
        drop(pred);
        queue.complete_runnable(popped);

        // The cascade resolved the aggregate and made its waiter ready.
        assert!(agg.is_complete());
        assert_eq!(follower.state(), TaskState::Ready);

        let popped = queue.pop().unwrap();
        drop((agg, follower));
        queue.complete_runnable(popped);
        assert!(queue.is_done());
        assert_eq!(queue.pool.live(), 0);
    }
}
