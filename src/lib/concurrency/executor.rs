//! Fixed-size async task executor over the priority task queue.
//!
//! The executor exists to oversubscribe a small number of expensive
//! resources (device callers) from many pipeline stages without starvation:
//! producers obtain a [`TaskSender`] bound to a priority class, and
//! [`TaskSender::send`] blocks until a worker has actually *begun* the task.
//! That handshake turns the queue into a rendezvous and bounds in-flight
//! work by the worker count.

use super::priority_queue::{PriorityTaskQueue, ProducerId, TaskPriority};
use super::synchronisation::Flag;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct WaitingTask {
    task: Task,
    started: Arc<Flag>,
}

struct Shared {
    queue: Mutex<PriorityTaskQueue<WaitingTask>>,
    task_available: Condvar,
    done: AtomicBool,
}

/// Producer-side handle for submitting tasks to an [`AsyncTaskExecutor`].
///
/// Each sender owns a per-producer sub-queue in the executor's priority
/// queue; clones share that sub-queue.
#[derive(Clone)]
pub struct TaskSender {
    shared: Arc<Shared>,
    producer: ProducerId,
}

impl TaskSender {
    /// Submit a task and block until a worker has begun executing it.
    ///
    /// The worker signals the task's started latch before invoking the task
    /// body, so on return the task is running (or finished), never merely
    /// queued.
    pub fn send<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let started = Arc::new(Flag::new());
        {
            let mut queue = self.shared.queue.lock();
            queue.push(
                self.producer,
                WaitingTask { task: Box::new(task), started: Arc::clone(&started) },
            );
        }
        self.shared.task_available.notify_one();
        started.wait();
    }
}

/// A fixed pool of worker threads draining a two-priority task queue.
///
/// Worker loop: pop, signal the task's started latch, execute, repeat until
/// the done flag is observed. Panics inside a task are not caught; a task
/// that must survive failure catches it in its own body.
pub struct AsyncTaskExecutor {
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    sentinel_producer: ProducerId,
    num_threads: usize,
    name: String,
}

impl AsyncTaskExecutor {
    /// Spawn an executor with `num_threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is zero.
    #[must_use]
    pub fn new(num_threads: usize, name: impl Into<String>) -> Self {
        assert!(num_threads > 0, "executor requires at least one worker");
        let name = name.into();
        let mut queue = PriorityTaskQueue::new();
        let sentinel_producer = queue.create_task_queue(TaskPriority::Normal);
        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            task_available: Condvar::new(),
            done: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let shared = Arc::clone(&shared);
            let thread_name = format!("{name}-{index}");
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || Self::process_task_queue(&shared))
                .expect("failed to spawn executor worker");
            threads.push(handle);
        }

        Self { shared, threads: Mutex::new(threads), sentinel_producer, num_threads, name }
    }

    /// Register a producer sub-queue and return its sender.
    #[must_use]
    pub fn create_task_queue(&self, priority: TaskPriority) -> TaskSender {
        let producer = self.shared.queue.lock().create_task_queue(priority);
        TaskSender { shared: Arc::clone(&self.shared), producer }
    }

    /// Number of tasks currently queued for the given priority.
    #[must_use]
    pub fn queue_size(&self, priority: TaskPriority) -> usize {
        self.shared.queue.lock().size_of(priority)
    }

    /// The executor's worker count.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Name the workers were spawned under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shut down the pool, blocking until every posted task has completed.
    ///
    /// One sentinel task per worker is posted so that every waiting worker
    /// receives a wakeup even if the queue was empty; the sentinels set the
    /// done flag, after which each worker exits its loop and is joined.
    pub fn join(&self) {
        let mut threads = self.threads.lock();
        if threads.is_empty() {
            return;
        }
        for _ in 0..self.num_threads {
            let shared = Arc::clone(&self.shared);
            {
                let mut queue = self.shared.queue.lock();
                queue.push(
                    self.sentinel_producer,
                    WaitingTask {
                        task: Box::new(move || shared.done.store(true, Ordering::Relaxed)),
                        started: Arc::new(Flag::new()),
                    },
                );
            }
            self.shared.task_available.notify_one();
        }
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    fn process_task_queue(shared: &Shared) {
        while !shared.done.load(Ordering::Relaxed) {
            let waiting = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some((task, _priority)) = queue.pop() {
                        break task;
                    }
                    shared.task_available.wait(&mut queue);
                }
            };
            waiting.started.signal();
            (waiting.task)();
        }
    }
}

impl Drop for AsyncTaskExecutor {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_send_runs_task() {
        let executor = AsyncTaskExecutor::new(2, "test");
        let sender = executor.create_task_queue(TaskPriority::Normal);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            sender.send(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.join();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_send_blocks_until_started() {
        // With a single worker occupied by a long task, a second send must
        // not return before the worker picks the new task up.
        let executor = AsyncTaskExecutor::new(1, "test");
        let sender = executor.create_task_queue(TaskPriority::Normal);

        let gate = Arc::new(Flag::new());
        let started_second = Arc::new(AtomicBool::new(false));

        {
            let gate = Arc::clone(&gate);
            sender.send(move || gate.wait());
        }

        let blocked_sender = sender.clone();
        let started_flag = Arc::clone(&started_second);
        let submitter = thread::spawn(move || {
            blocked_sender.send(move || {
                started_flag.store(true, Ordering::SeqCst);
            });
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!submitter.is_finished(), "send returned before a worker started the task");
        assert!(!started_second.load(Ordering::SeqCst));

        gate.signal();
        submitter.join().unwrap();
        executor.join();
        assert!(started_second.load(Ordering::SeqCst), "the picked-up task ran to completion");
    }

    #[test]
    fn test_join_completes_all_tasks() {
        let executor = AsyncTaskExecutor::new(4, "test");
        let sender = executor.create_task_queue(TaskPriority::Normal);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            sender.send(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        executor.join();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_join_idempotent_and_empty_queue() {
        let executor = AsyncTaskExecutor::new(3, "test");
        executor.join();
        executor.join();
    }

    #[test]
    fn test_high_priority_served_first() {
        // One worker, held busy while both classes queue up; the high task
        // must run before the queued normal tasks.
        let executor = AsyncTaskExecutor::new(1, "test");
        let normal = executor.create_task_queue(TaskPriority::Normal);
        let high = executor.create_task_queue(TaskPriority::High);

        let gate = Arc::new(Flag::new());
        {
            let gate = Arc::clone(&gate);
            normal.send(move || gate.wait());
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut submitters = Vec::new();
        for i in 0..3 {
            let normal = normal.clone();
            let order = Arc::clone(&order);
            submitters.push(thread::spawn(move || {
                normal.send(move || order.lock().push(format!("normal-{i}")));
            }));
        }
        thread::sleep(Duration::from_millis(20));
        {
            let high = high.clone();
            let order = Arc::clone(&order);
            submitters.push(thread::spawn(move || {
                high.send(move || order.lock().push("high".to_string()));
            }));
        }
        thread::sleep(Duration::from_millis(20));

        gate.signal();
        for submitter in submitters {
            submitter.join().unwrap();
        }
        executor.join();

        let order = order.lock();
        assert_eq!(order.first().map(String::as_str), Some("high"));
        assert_eq!(order.len(), 4);
    }
}
