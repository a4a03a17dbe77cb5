//! Flowsched — dependency-graph task runtime
//!
//! A completion-and-scheduling core for task graphs: runnable tasks depend
//! on at most one predecessor, aggregate (join) tasks depend on many, and
//! the scheduler decides when each becomes eligible to run, detects when
//! the whole graph has drained, and reclaims task storage once nothing
//! references it. The wait/wake race between a task registering against a
//! predecessor and that predecessor completing is resolved lock-free.
//!
//! # Example
//!
//! ```
//! use flowsched::TaskQueue;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let queue = TaskQueue::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! let h = hits.clone();
//! let first = queue.spawn(move |_cx| { h.fetch_add(1, Ordering::SeqCst); }).unwrap();
//! let h = hits.clone();
//! queue.spawn_after(&first, move |_cx| { h.fetch_add(1, Ordering::SeqCst); }).unwrap();
//!
//! queue.run_until_done();
//! assert_eq!(hits.load(Ordering::SeqCst), 2);
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;

// Re-exports
pub use pool::{SpawnError, TaskPool};
pub use queue::{QueueConfig, QueueStats, TaskQueue};
pub use scheduler::{ReadyCount, SchedulingQueue};
pub use task::{TaskContext, TaskId, TaskIdGenerator, TaskNode, TaskRef, TaskState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
