//! Concurrency contracts: priority fairness, rendezvous send, and queue
//! backpressure under many producers.

use parking_lot::Mutex;
use porecall_lib::concurrency::{
    AsyncTaskExecutor, Flag, PriorityTaskQueue, TaskPriority, WorkQueue,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_high_priority_flood_resistance() {
    // Four normal producers flood 400 tasks; one high producer queues 10.
    // Every high task must pop before any of the queued normal tasks.
    let mut queue = PriorityTaskQueue::new();
    let normal_producers: Vec<_> =
        (0..4).map(|_| queue.create_task_queue(TaskPriority::Normal)).collect();
    let high_producer = queue.create_task_queue(TaskPriority::High);

    for i in 0..400 {
        queue.push(normal_producers[i % 4], ("normal", i));
    }
    for i in 0..10 {
        queue.push(high_producer, ("high", i));
    }

    for _ in 0..10 {
        let (task, priority) = queue.pop().unwrap();
        assert_eq!(task.0, "high");
        assert_eq!(priority, TaskPriority::High);
    }
    assert!(queue.is_empty_of(TaskPriority::High));
    assert_eq!(queue.size_of(TaskPriority::Normal), 400);

    // The normal backlog then drains fairly: four consecutive pops serve
    // four distinct producers.
    let first_four: Vec<usize> = (0..4).map(|_| queue.pop().unwrap().0.1 % 4).collect();
    let distinct: std::collections::HashSet<_> = first_four.iter().collect();
    assert_eq!(distinct.len(), 4);
}

#[test]
fn test_executor_high_tasks_run_before_queued_normal() {
    // One gated worker; normal tasks pile up behind it, then high tasks
    // arrive. Once the gate opens, all high tasks must run before the
    // queued normal ones.
    let executor = AsyncTaskExecutor::new(1, "itest");
    let normal = executor.create_task_queue(TaskPriority::Normal);
    let high = executor.create_task_queue(TaskPriority::High);

    let gate = Arc::new(Flag::new());
    {
        let gate = Arc::clone(&gate);
        normal.send(move || gate.wait());
    }

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut submitters = Vec::new();
    for _ in 0..3 {
        let normal = normal.clone();
        let order = Arc::clone(&order);
        submitters.push(thread::spawn(move || {
            normal.send(move || order.lock().push("normal"));
        }));
    }
    thread::sleep(Duration::from_millis(30));
    for _ in 0..2 {
        let high = high.clone();
        let order = Arc::clone(&order);
        submitters.push(thread::spawn(move || {
            high.send(move || order.lock().push("high"));
        }));
    }
    thread::sleep(Duration::from_millis(30));

    gate.signal();
    for submitter in submitters {
        submitter.join().unwrap();
    }
    executor.join();

    let order = order.lock();
    assert_eq!(order.len(), 5);
    assert_eq!(&order[..2], &["high", "high"], "high tasks run first: {order:?}");
}

#[test]
fn test_executor_send_is_a_rendezvous() {
    // With N workers all busy, the (N+1)th send must not return until a
    // worker frees up, bounding in-flight work by the pool size.
    let executor = AsyncTaskExecutor::new(2, "itest");
    let sender = executor.create_task_queue(TaskPriority::Normal);

    let gate = Arc::new(Flag::new());
    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        sender.send(move || gate.wait());
    }

    let extra_started = Arc::new(AtomicUsize::new(0));
    let submitter = {
        let sender = sender.clone();
        let extra_started = Arc::clone(&extra_started);
        thread::spawn(move || {
            sender.send(move || {
                extra_started.fetch_add(1, Ordering::SeqCst);
            });
        })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!submitter.is_finished(), "send must block while the pool is saturated");
    assert_eq!(extra_started.load(Ordering::SeqCst), 0);

    gate.signal();
    submitter.join().unwrap();
    executor.join();
    assert_eq!(extra_started.load(Ordering::SeqCst), 1);
}

#[test]
fn test_work_queue_bounded_under_contention() {
    let queue = Arc::new(WorkQueue::new(8));
    let total = 4 * 250;

    let mut producers = Vec::new();
    for p in 0..4 {
        let queue = Arc::clone(&queue);
        producers.push(thread::spawn(move || {
            for i in 0..250 {
                queue.try_push((p, i)).unwrap();
            }
        }));
    }

    let consumed = Arc::new(AtomicUsize::new(0));
    let mut consumers = Vec::new();
    for _ in 0..2 {
        let queue = Arc::clone(&queue);
        let consumed = Arc::clone(&consumed);
        consumers.push(thread::spawn(move || {
            while queue.pop().is_some() {
                consumed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    for producer in producers {
        producer.join().unwrap();
    }
    queue.terminate();
    for consumer in consumers {
        consumer.join().unwrap();
    }

    assert_eq!(consumed.load(Ordering::SeqCst), total, "no message lost or duplicated");
    assert!(queue.high_water() <= 8, "observed size never exceeds capacity");
}
