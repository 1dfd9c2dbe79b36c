//! Synchronisation primitives and the priority task executor.
//!
//! # Key Types
//!
//! - [`WorkQueue`]: bounded MPMC queue with terminate/restart, used as every
//!   pipeline node's inbox
//! - [`PriorityTaskQueue`]: two-priority, producer-fair task queue
//! - [`AsyncTaskExecutor`]: fixed worker pool with rendezvous `send`
//! - [`Flag`] / [`Latch`]: one-shot and counting signals

pub mod executor;
pub mod priority_queue;
pub mod synchronisation;
pub mod work_queue;

pub use executor::{AsyncTaskExecutor, TaskSender};
pub use priority_queue::{PriorityTaskQueue, ProducerId, TaskPriority};
pub use synchronisation::{Flag, Latch};
pub use work_queue::WorkQueue;
