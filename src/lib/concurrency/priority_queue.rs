//! Two-priority, producer-fair task queue.
//!
//! Tasks are pushed through per-producer sub-queues created with
//! [`PriorityTaskQueue::create_task_queue`]. Popping prefers high priority
//! over normal and, within a priority class, round-robins across the
//! producers that have pending work, so a single flooding producer cannot
//! starve its peers.
//!
//! The structure itself is not synchronised; the owner (the task executor)
//! provides locking around it.

use std::collections::VecDeque;

/// Priority class for queued tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    /// Background work.
    Normal,
    /// Latency-sensitive work, always popped before normal tasks.
    High,
}

impl TaskPriority {
    fn index(self) -> usize {
        match self {
            TaskPriority::Normal => 0,
            TaskPriority::High => 1,
        }
    }
}

/// Identifier of a producer sub-queue within a [`PriorityTaskQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerId(usize);

struct ProducerQueue<T> {
    priority: TaskPriority,
    tasks: VecDeque<T>,
    // Whether this producer currently sits in its class's rotation list.
    queued: bool,
}

/// Queue over `(task, priority)` with per-producer fairness.
///
/// Within a priority class, the producer whose most recent pop is least
/// recent wins ties: on the empty-to-non-empty transition a producer joins
/// the tail of its class's rotation, and after a pop it is re-appended to
/// the tail iff it still has pending work, otherwise it is detached.
pub struct PriorityTaskQueue<T> {
    producers: Vec<ProducerQueue<T>>,
    // Rotation lists per class, indexed by TaskPriority::index.
    rotation: [VecDeque<usize>; 2],
    counts: [usize; 2],
}

impl<T> Default for PriorityTaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityTaskQueue<T> {
    /// Create an empty queue with no producers.
    #[must_use]
    pub fn new() -> Self {
        Self { producers: Vec::new(), rotation: [VecDeque::new(), VecDeque::new()], counts: [0, 0] }
    }

    /// Register a new producer sub-queue with the given priority.
    pub fn create_task_queue(&mut self, priority: TaskPriority) -> ProducerId {
        self.producers.push(ProducerQueue { priority, tasks: VecDeque::new(), queued: false });
        ProducerId(self.producers.len() - 1)
    }

    /// Push a task onto a producer's sub-queue.
    ///
    /// # Panics
    ///
    /// Panics if `producer` was not created by this queue.
    pub fn push(&mut self, producer: ProducerId, task: T) {
        let queue = &mut self.producers[producer.0];
        queue.tasks.push_back(task);
        self.counts[queue.priority.index()] += 1;
        if !queue.queued {
            queue.queued = true;
            self.rotation[queue.priority.index()].push_back(producer.0);
        }
    }

    /// Pop the next task, preferring high priority over normal.
    pub fn pop(&mut self) -> Option<(T, TaskPriority)> {
        if let Some(task) = self.pop_priority(TaskPriority::High) {
            return Some((task, TaskPriority::High));
        }
        self.pop_priority(TaskPriority::Normal).map(|task| (task, TaskPriority::Normal))
    }

    /// Pop the next task of exactly the given priority class.
    pub fn pop_priority(&mut self, priority: TaskPriority) -> Option<T> {
        let class = priority.index();
        let producer_idx = self.rotation[class].pop_front()?;
        let queue = &mut self.producers[producer_idx];
        let task = queue.tasks.pop_front().expect("queued producer has a pending task");
        self.counts[class] -= 1;
        if queue.tasks.is_empty() {
            queue.queued = false;
        } else {
            self.rotation[class].push_back(producer_idx);
        }
        Some(task)
    }

    /// Total number of queued tasks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.counts[0] + self.counts[1]
    }

    /// Number of queued tasks of the given priority.
    #[must_use]
    pub fn size_of(&self, priority: TaskPriority) -> usize {
        self.counts[priority.index()]
    }

    /// Whether no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether no tasks of the given priority are queued.
    #[must_use]
    pub fn is_empty_of(&self, priority: TaskPriority) -> bool {
        self.size_of(priority) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_popped_before_normal() {
        let mut queue = PriorityTaskQueue::new();
        let normal = queue.create_task_queue(TaskPriority::Normal);
        let high = queue.create_task_queue(TaskPriority::High);

        queue.push(normal, 1);
        queue.push(normal, 2);
        queue.push(high, 10);
        queue.push(high, 11);

        assert_eq!(queue.pop(), Some((10, TaskPriority::High)));
        assert_eq!(queue.pop(), Some((11, TaskPriority::High)));
        assert_eq!(queue.pop(), Some((1, TaskPriority::Normal)));
        assert_eq!(queue.pop(), Some((2, TaskPriority::Normal)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_round_robin_within_class() {
        let mut queue = PriorityTaskQueue::new();
        let producers: Vec<_> =
            (0..4).map(|_| queue.create_task_queue(TaskPriority::Normal)).collect();

        // Each producer pushes one task; four pops return one task apiece.
        for (i, producer) in producers.iter().enumerate() {
            queue.push(*producer, i);
        }
        let mut popped: Vec<_> = (0..4).map(|_| queue.pop().unwrap().0).collect();
        popped.sort_unstable();
        assert_eq!(popped, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_flooding_producer_does_not_starve() {
        let mut queue = PriorityTaskQueue::new();
        let flooder = queue.create_task_queue(TaskPriority::Normal);
        let other = queue.create_task_queue(TaskPriority::Normal);

        for i in 0..100 {
            queue.push(flooder, i);
        }
        queue.push(other, 1000);

        // The other producer gets served on the second pop, not after the
        // flooder's backlog drains.
        assert_eq!(queue.pop().unwrap().0, 0);
        assert_eq!(queue.pop().unwrap().0, 1000);
        assert_eq!(queue.pop().unwrap().0, 1);
    }

    #[test]
    fn test_lru_detach_and_rejoin() {
        let mut queue = PriorityTaskQueue::new();
        let a = queue.create_task_queue(TaskPriority::Normal);
        let b = queue.create_task_queue(TaskPriority::Normal);

        queue.push(a, 1);
        assert_eq!(queue.pop().unwrap().0, 1);
        // `a` is now detached; a fresh push from `b` then `a` serves `b` first.
        queue.push(b, 2);
        queue.push(a, 3);
        assert_eq!(queue.pop().unwrap().0, 2);
        assert_eq!(queue.pop().unwrap().0, 3);
    }

    #[test]
    fn test_pop_priority_exact_class() {
        let mut queue = PriorityTaskQueue::new();
        let normal = queue.create_task_queue(TaskPriority::Normal);
        let high = queue.create_task_queue(TaskPriority::High);

        queue.push(normal, 1);
        queue.push(high, 2);

        assert_eq!(queue.pop_priority(TaskPriority::Normal), Some(1));
        assert_eq!(queue.pop_priority(TaskPriority::Normal), None);
        assert_eq!(queue.pop_priority(TaskPriority::High), Some(2));
    }

    #[test]
    fn test_counters() {
        let mut queue = PriorityTaskQueue::new();
        let normal = queue.create_task_queue(TaskPriority::Normal);
        let high = queue.create_task_queue(TaskPriority::High);

        assert!(queue.is_empty());
        queue.push(normal, 1);
        queue.push(high, 2);
        queue.push(high, 3);

        assert_eq!(queue.size(), 3);
        assert_eq!(queue.size_of(TaskPriority::Normal), 1);
        assert_eq!(queue.size_of(TaskPriority::High), 2);
        assert!(!queue.is_empty_of(TaskPriority::High));

        queue.pop();
        assert_eq!(queue.size_of(TaskPriority::High), 1);
    }
}
