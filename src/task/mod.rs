//! Task nodes for the dependency-graph runtime.
//!
//! A task is a single shared allocation (`TaskRef`, an `Arc<TaskNode>`)
//! owned jointly by whichever structures need it alive: a ready queue, a
//! predecessor's wait list, a dependence slot of a downstream task, or a
//! user handle. Releasing the last handle reclaims the storage, so the
//! "decrement reference count, check zero, deallocate" discipline lives in
//! one place instead of at every call site.

pub(crate) mod wait_list;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::pool::PoolTicket;
use self::wait_list::WaitList;

/// Shared handle to a task allocation.
///
/// Every structure that needs the task to stay alive holds its own
/// `TaskRef`; the task is deallocated when the last one is released.
pub type TaskRef = Arc<TaskNode>;

/// Executable body of a runnable task. `FnMut` so a respawned task can run
/// its body again.
pub(crate) type TaskBody = Box<dyn FnMut(&TaskContext<'_>) + Send>;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Thread-safe generator for unique task IDs.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new generator starting at zero.
    #[inline]
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
        }
    }

    /// Generate the next unique ID.
    #[inline]
    pub fn generate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a task.
///
/// The state byte is advisory: it tracks where a task is for observability
/// and debug assertions. The authoritative completion flag is the closed
/// wait list, which is what append attempts race against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed, not yet handed to the scheduler.
    Created,
    /// Parked in a predecessor's wait list.
    Waiting,
    /// In a ready queue, eligible to run.
    Ready,
    /// Popped and executing.
    Running,
    /// Completed; waiters have been or are being notified.
    Finished,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Created,
            1 => TaskState::Waiting,
            2 => TaskState::Ready,
            3 => TaskState::Running,
            4 => TaskState::Finished,
            _ => TaskState::Created,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::Waiting => 1,
            TaskState::Ready => 2,
            TaskState::Running => 3,
            TaskState::Finished => 4,
        }
    }
}

/// Dependence slots of an aggregate. Most joins are small; four inline
/// slots cover them without a heap hop.
type DependenceList = SmallVec<[Mutex<Option<TaskRef>>; 4]>;

/// Payload of a runnable task: an executable body, at most one predecessor,
/// and a respawn flag the body may set while running.
struct RunnableCore {
    body: Mutex<Option<TaskBody>>,
    predecessor: Mutex<Option<TaskRef>>,
    respawn: AtomicBool,
}

/// Payload of an aggregate (join) task: an ordered, fixed-length list of
/// predecessor slots and no body of its own.
struct AggregateCore {
    dependences: DependenceList,
}

/// What a task is: a runnable unit of work or a join over other tasks.
enum TaskKind {
    Runnable(RunnableCore),
    Aggregate(AggregateCore),
}

/// A node in the task graph.
///
/// The scheduler mutates a task's own fields (predecessor slots, respawn
/// flag, body) only while holding logical exclusive access to it; the wait
/// list is the sole field touched by concurrent callers.
pub struct TaskNode {
    /// Unique task ID.
    id: TaskId,
    /// Advisory lifecycle state.
    state: AtomicU8,
    /// Tasks blocked on this task's completion.
    waiters: WaitList,
    /// Intrusive link used while this task sits in another task's wait list.
    pub(crate) next_waiting: AtomicPtr<TaskNode>,
    /// Live-task accounting handle; released when the node is dropped.
    #[allow(dead_code)]
    ticket: PoolTicket,
    /// Runnable or aggregate payload.
    kind: TaskKind,
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("kind", &self.kind_name())
            .finish()
    }
}

impl TaskNode {
    /// Create a runnable task, optionally depending on one predecessor.
    ///
    /// The predecessor slot takes its own reference on the predecessor; the
    /// scheduler releases it after the append attempt resolves the edge.
    pub(crate) fn new_runnable(
        id: TaskId,
        ticket: PoolTicket,
        body: TaskBody,
        predecessor: Option<TaskRef>,
    ) -> Self {
        Self {
            id,
            state: AtomicU8::new(TaskState::Created.as_u8()),
            waiters: WaitList::new(),
            next_waiting: AtomicPtr::new(std::ptr::null_mut()),
            ticket,
            kind: TaskKind::Runnable(RunnableCore {
                body: Mutex::new(Some(body)),
                predecessor: Mutex::new(predecessor),
                respawn: AtomicBool::new(false),
            }),
        }
    }

    /// Create an aggregate task joining on `dependences`, in order.
    ///
    /// Each slot takes its own reference on its predecessor, released as the
    /// scheduler resolves the slot.
    pub(crate) fn new_aggregate(id: TaskId, ticket: PoolTicket, dependences: &[TaskRef]) -> Self {
        Self {
            id,
            state: AtomicU8::new(TaskState::Created.as_u8()),
            waiters: WaitList::new(),
            next_waiting: AtomicPtr::new(std::ptr::null_mut()),
            ticket,
            kind: TaskKind::Aggregate(AggregateCore {
                dependences: dependences
                    .iter()
                    .map(|dep| Mutex::new(Some(Arc::clone(dep))))
                    .collect(),
            }),
        }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current lifecycle state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Set the lifecycle state.
    #[inline]
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Whether this task carries an executable body.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self.kind, TaskKind::Runnable(_))
    }

    /// Whether this task has completed and no longer accepts waiters.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.waiters.is_closed()
    }

    /// Try to register `task` as a waiter on this task's completion.
    ///
    /// Fails, returning the handle, iff this task has already completed; the
    /// caller must then treat the waiter as immediately ready.
    #[inline]
    pub fn try_add_waiting(&self, task: TaskRef) -> Result<(), TaskRef> {
        self.waiters.try_push(task)
    }

    /// Close the wait list and hand each registered waiter to `visit`.
    /// Invoked exactly once, by the caller completing this task.
    #[inline]
    pub(crate) fn consume_wait_queue<F>(&self, visit: F)
    where
        F: FnMut(TaskRef),
    {
        self.waiters.close_and_drain(visit);
    }

    /// Whether a predecessor is currently attached.
    #[inline]
    pub fn has_predecessor(&self) -> bool {
        self.runnable().predecessor.lock().is_some()
    }

    /// Take the predecessor out of the slot, leaving it empty.
    ///
    /// Single-owner access: only the caller currently scheduling this task
    /// may touch the slot.
    #[inline]
    pub(crate) fn take_predecessor(&self) -> Option<TaskRef> {
        self.runnable().predecessor.lock().take()
    }

    /// Attach a predecessor; the slot owns the given reference.
    #[inline]
    pub(crate) fn store_predecessor(&self, predecessor: TaskRef) {
        *self.runnable().predecessor.lock() = Some(predecessor);
    }

    /// Whether the body requested a respawn on its last run.
    #[inline]
    pub fn respawn_requested(&self) -> bool {
        self.runnable().respawn.load(Ordering::SeqCst)
    }

    /// Set or clear the respawn flag.
    #[inline]
    pub(crate) fn set_respawn(&self, respawn: bool) {
        self.runnable().respawn.store(respawn, Ordering::SeqCst);
    }

    /// Take the executable body for one run.
    #[inline]
    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.runnable().body.lock().take()
    }

    /// Put the body back so a respawned task can run it again.
    #[inline]
    pub(crate) fn restore_body(&self, body: TaskBody) {
        *self.runnable().body.lock() = Some(body);
    }

    /// Number of dependence slots of an aggregate.
    #[inline]
    pub fn dependence_count(&self) -> usize {
        self.aggregate().dependences.len()
    }

    /// Ordered dependence slots of an aggregate.
    #[inline]
    pub(crate) fn dependence_slots(&self) -> &[Mutex<Option<TaskRef>>] {
        &self.aggregate().dependences
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            TaskKind::Runnable(_) => "runnable",
            TaskKind::Aggregate(_) => "aggregate",
        }
    }

    fn runnable(&self) -> &RunnableCore {
        match &self.kind {
            TaskKind::Runnable(core) => core,
            TaskKind::Aggregate(_) => unreachable!("runnable operation on aggregate task"),
        }
    }

    fn aggregate(&self) -> &AggregateCore {
        match &self.kind {
            TaskKind::Aggregate(core) => core,
            TaskKind::Runnable(_) => unreachable!("aggregate operation on runnable task"),
        }
    }
}

/// Handle passed to a task body while it runs.
///
/// The body may ask to be re-enqueued instead of finishing, optionally
/// after a new predecessor completes.
pub struct TaskContext<'a> {
    task: &'a TaskNode,
}

impl<'a> TaskContext<'a> {
    #[inline]
    pub(crate) fn new(task: &'a TaskNode) -> Self {
        Self { task }
    }

    /// ID of the running task.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Re-enqueue this task after the current run instead of finishing it.
    #[inline]
    pub fn respawn(&self) {
        self.task.set_respawn(true);
    }

    /// Re-enqueue this task once `predecessor` has completed.
    ///
    /// The dependence takes its own reference on the predecessor, so the
    /// predecessor stays alive until the scheduler resolves the new edge.
    #[inline]
    pub fn respawn_after(&self, predecessor: &TaskRef) {
        self.task.store_predecessor(Arc::clone(predecessor));
        self.task.set_respawn(true);
    }
}
