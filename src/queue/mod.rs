//! Concrete task queue and execution driver.
//!
//! [`TaskQueue`] supplies the three primitives the scheduling protocol
//! needs — FIFO ready storage, deallocation through the pool, and a
//! [`ReadyCount`] — and layers the construction API on top: spawning
//! runnable tasks, attaching a single predecessor, and joining many
//! predecessors with an aggregate. A minimal driver pops ready tasks, runs
//! their bodies, and feeds completions back into the protocol, on one
//! thread or several.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use tracing::trace;

use crate::pool::{SpawnError, TaskPool};
use crate::scheduler::{ReadyCount, SchedulingQueue};
use crate::task::{TaskContext, TaskIdGenerator, TaskNode, TaskRef, TaskState};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of live tasks admitted at once.
    pub capacity: usize,
    /// Worker threads used by [`TaskQueue::run_parallel`].
    pub num_workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            capacity: 1024,
            num_workers: num_cpus,
        }
    }
}

/// Queue statistics.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Runnable tasks spawned.
    pub tasks_spawned: AtomicUsize,
    /// Aggregate tasks spawned.
    pub aggregates_spawned: AtomicUsize,
    /// Task body executions (respawned runs included).
    pub tasks_executed: AtomicUsize,
    /// Executions that requested a respawn.
    pub tasks_respawned: AtomicUsize,
    /// Nodes deallocated through the scheduler.
    pub tasks_deallocated: AtomicUsize,
}

impl QueueStats {
    /// Record a spawned runnable task.
    #[inline]
    pub fn record_spawned(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a spawned aggregate.
    #[inline]
    pub fn record_aggregate(&self) {
        self.aggregates_spawned.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one body execution.
    #[inline]
    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record an execution that requested a respawn.
    #[inline]
    pub fn record_respawned(&self) {
        self.tasks_respawned.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a node reclaimed through the scheduler.
    #[inline]
    pub fn record_deallocated(&self) {
        self.tasks_deallocated.fetch_add(1, Ordering::SeqCst);
    }
}

/// FIFO task queue with dependency-aware scheduling.
///
/// Ready tasks are stored in a mutex-guarded deque; the completion and
/// scheduling protocol itself never takes that lock on the waiting path,
/// only on push and pop.
#[derive(Debug)]
pub struct TaskQueue {
    /// Configuration.
    config: QueueConfig,
    /// Ready tasks, in FIFO order.
    ready: Mutex<VecDeque<TaskRef>>,
    /// Quiescence tracker.
    counter: ReadyCount,
    /// Admission and reclamation accounting.
    pool: TaskPool,
    /// Task ID generator.
    ids: TaskIdGenerator,
    /// Statistics.
    stats: QueueStats,
}

impl SchedulingQueue for TaskQueue {
    #[inline]
    fn ready_count(&self) -> &ReadyCount {
        &self.counter
    }

    #[inline]
    fn push_ready(&self, task: TaskRef) {
        self.ready.lock().push_back(task);
    }

    #[inline]
    fn deallocate(&self, node: TaskNode) {
        self.stats.record_deallocated();
        self.pool.reclaim(node);
    }
}

impl TaskQueue {
    /// Create a queue with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a queue with a custom configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        let pool = TaskPool::new(config.capacity);
        Self {
            config,
            ready: Mutex::new(VecDeque::new()),
            counter: ReadyCount::new(),
            pool,
            ids: TaskIdGenerator::new(),
            stats: QueueStats::default(),
        }
    }

    /// Spawn a runnable task with no predecessor; it becomes ready
    /// immediately.
    pub fn spawn<F>(&self, body: F) -> Result<TaskRef, SpawnError>
    where
        F: FnMut(&TaskContext<'_>) + Send + 'static,
    {
        self.spawn_task(None, Box::new(body))
    }

    /// Spawn a runnable task that becomes ready once `predecessor`
    /// completes.
    pub fn spawn_after<F>(&self, predecessor: &TaskRef, body: F) -> Result<TaskRef, SpawnError>
    where
        F: FnMut(&TaskContext<'_>) + Send + 'static,
    {
        self.spawn_task(Some(Arc::clone(predecessor)), Box::new(body))
    }

    fn spawn_task(
        &self,
        predecessor: Option<TaskRef>,
        body: crate::task::TaskBody,
    ) -> Result<TaskRef, SpawnError> {
        let ticket = self.pool.reserve()?;
        let id = self.ids.generate();
        let task: TaskRef = Arc::new(TaskNode::new_runnable(id, ticket, body, predecessor));
        self.stats.record_spawned();
        trace!(task = %id, "spawned runnable task");
        self.schedule_runnable(Arc::clone(&task));
        Ok(task)
    }

    /// Spawn an aggregate that completes once every task in `dependences`
    /// has completed. An empty list completes immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowsched::TaskQueue;
    ///
    /// let queue = TaskQueue::new();
    /// let first = queue.spawn(|_cx| {}).unwrap();
    /// let second = queue.spawn(|_cx| {}).unwrap();
    /// let join = queue.when_all(&[first, second]).unwrap();
    ///
    /// queue.run_until_done();
    /// assert!(join.is_complete());
    /// ```
    pub fn when_all(&self, dependences: &[TaskRef]) -> Result<TaskRef, SpawnError> {
        let ticket = self.pool.reserve()?;
        let id = self.ids.generate();
        let task: TaskRef = Arc::new(TaskNode::new_aggregate(id, ticket, dependences));
        self.stats.record_aggregate();
        trace!(task = %id, dependences = dependences.len(), "spawned aggregate task");
        self.schedule_aggregate(Arc::clone(&task));
        Ok(task)
    }

    /// Pop the next ready task, if any.
    #[inline]
    pub fn pop_ready(&self) -> Option<TaskRef> {
        self.ready.lock().pop_front()
    }

    /// Number of tasks currently ready.
    #[inline]
    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    /// Run a popped task's body and feed the completion back into the
    /// protocol. Call exactly once per popped task.
    pub fn execute(&self, task: TaskRef) {
        debug_assert_eq!(task.state(), TaskState::Ready);
        task.set_state(TaskState::Running);

        if let Some(mut body) = task.take_body() {
            let cx = TaskContext::new(&task);
            body(&cx);
            if task.respawn_requested() {
                // The body runs again after the respawn resolves.
                task.restore_body(body);
                self.stats.record_respawned();
            }
        }
        self.stats.record_executed();

        self.complete_runnable(task);
    }

    /// Drive the queue on the calling thread until it drains to quiescence.
    ///
    /// Call after the initial graph has been spawned; tasks spawned by
    /// running bodies are picked up as they appear.
    pub fn run_until_done(&self) {
        let backoff = Backoff::new();
        loop {
            if let Some(task) = self.pop_ready() {
                backoff.reset();
                self.execute(task);
            } else if self.is_done() {
                break;
            } else {
                // Tasks are in flight on other workers; their completions
                // may still push waiters our way.
                backoff.snooze();
            }
        }
    }

    /// Drive the queue with `num_workers` scoped worker threads until it
    /// drains to quiescence.
    pub fn run_parallel(&self, num_workers: usize) {
        thread::scope(|scope| {
            for _ in 0..num_workers.max(1) {
                scope.spawn(|| self.run_until_done());
            }
        });
    }

    /// Drive the queue with the configured number of workers.
    #[inline]
    pub fn run(&self) {
        self.run_parallel(self.config.num_workers);
    }

    /// Get the statistics.
    #[inline]
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Get the pool accounting.
    #[inline]
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
