use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;
use crate::task::SharedTask;
use crate::types::{Priority, TaskId};

/// Heap entry. The key is captured when the task is offered; since the task's
/// time and priority only change while it is out of the heap, the captured
/// key always matches the task.
#[derive(Debug, Clone)]
struct QueueEntry {
    due: DateTime<Utc>,
    priority: Priority,
    task: SharedTask,
}

impl QueueEntry {
    fn new(task: SharedTask) -> Self {
        Self {
            due: task.scheduled_time(),
            priority: task.priority(),
            task,
        }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest and most
        // urgent entry on top.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}

/// The heap itself, reachable only through a [`DueQueue`] lock.
#[derive(Debug, Default)]
pub struct DueHeap {
    heap: BinaryHeap<QueueEntry>,
}

impl DueHeap {
    pub fn offer(&mut self, task: SharedTask) {
        self.heap.push(QueueEntry::new(task));
    }

    pub fn peek_earliest(&self) -> Option<&SharedTask> {
        self.heap.peek().map(|e| &e.task)
    }

    pub fn poll_earliest(&mut self) -> Option<SharedTask> {
        self.heap.pop().map(|e| e.task)
    }

    /// Remove the task with `id` from anywhere in the heap. O(n).
    pub fn remove(&mut self, id: &TaskId) -> Option<SharedTask> {
        let mut removed = None;
        self.heap.retain(|e| {
            if removed.is_none() && e.task.id() == *id {
                removed = Some(Arc::clone(&e.task));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Pop every task due at or before `now`, in (due, priority) order.
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<SharedTask> {
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.due > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry.task);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn count_by_priority(&self, priority: Priority) -> usize {
        self.heap.iter().filter(|e| e.priority == priority).count()
    }
}

/// Mutex-guarded due-time priority queue.
///
/// Every read and write goes through the single lock. Multi-step operations
/// (remove + mutate + reinsert) take the lock once via [`DueQueue::lock`].
#[derive(Debug, Default)]
pub struct DueQueue {
    inner: Mutex<DueHeap>,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, DueHeap>, SchedulerError> {
        self.inner
            .lock()
            .map_err(|e| SchedulerError::LockPoisoned(format!("due queue: {}", e)))
    }

    pub fn offer(&self, task: SharedTask) -> Result<(), SchedulerError> {
        self.lock()?.offer(task);
        Ok(())
    }

    pub fn peek_earliest(&self) -> Result<Option<SharedTask>, SchedulerError> {
        Ok(self.lock()?.peek_earliest().cloned())
    }

    pub fn poll_earliest(&self) -> Result<Option<SharedTask>, SchedulerError> {
        Ok(self.lock()?.poll_earliest())
    }

    pub fn remove(&self, id: &TaskId) -> Result<Option<SharedTask>, SchedulerError> {
        Ok(self.lock()?.remove(id))
    }

    pub fn len(&self) -> Result<usize, SchedulerError> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::task::{ScheduledTask, Task, TaskError};

    fn make(name: &str, when: DateTime<Utc>, priority: Priority) -> SharedTask {
        let task = Task::new(name, || -> Result<(), TaskError> { Ok(()) }).with_priority(priority);
        Arc::new(ScheduledTask::new(TaskId::generate(), task, when, None, when))
    }

    #[test]
    fn orders_by_time_then_priority() {
        let queue = DueQueue::new();
        let t0 = Utc::now();
        queue.offer(make("later", t0 + TimeDelta::seconds(5), Priority::Critical)).unwrap();
        queue.offer(make("low", t0, Priority::Low)).unwrap();
        queue.offer(make("critical", t0, Priority::Critical)).unwrap();
        queue.offer(make("medium", t0, Priority::Medium)).unwrap();

        assert_eq!(queue.peek_earliest().unwrap().unwrap().name(), "critical");

        let mut order = Vec::new();
        while let Some(task) = queue.poll_earliest().unwrap() {
            order.push(task.name().to_string());
        }
        assert_eq!(order, vec!["critical", "medium", "low", "later"]);
    }

    #[test]
    fn remove_from_middle() {
        let queue = DueQueue::new();
        let t0 = Utc::now();
        let a = make("a", t0, Priority::High);
        let b = make("b", t0 + TimeDelta::seconds(1), Priority::High);
        let c = make("c", t0 + TimeDelta::seconds(2), Priority::High);
        for t in [&a, &b, &c] {
            queue.offer(Arc::clone(t)).unwrap();
        }

        assert!(queue.remove(&b.id()).unwrap().is_some());
        assert!(queue.remove(&b.id()).unwrap().is_none(), "absent task is a no-op");
        assert_eq!(queue.len().unwrap(), 2);
        assert_eq!(queue.poll_earliest().unwrap().unwrap().id(), a.id());
        assert_eq!(queue.poll_earliest().unwrap().unwrap().id(), c.id());
    }

    #[test]
    fn drain_due_stops_at_future_tasks() {
        let queue = DueQueue::new();
        let t0 = Utc::now();
        queue.offer(make("past", t0 - TimeDelta::seconds(3), Priority::Low)).unwrap();
        queue.offer(make("now", t0, Priority::Low)).unwrap();
        queue.offer(make("future", t0 + TimeDelta::milliseconds(1), Priority::Critical)).unwrap();

        let drained: Vec<String> = queue
            .lock()
            .unwrap()
            .drain_due(t0)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(drained, vec!["past", "now"]);
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn empty_queue_peeks_none() {
        let queue = DueQueue::new();
        assert!(queue.peek_earliest().unwrap().is_none());
        assert!(queue.poll_earliest().unwrap().is_none());
        assert!(queue.lock().unwrap().drain_due(Utc::now()).is_empty());
    }

    #[test]
    fn counts_pending_per_priority() {
        let queue = DueQueue::new();
        let t0 = Utc::now();
        queue.offer(make("a", t0, Priority::High)).unwrap();
        queue.offer(make("b", t0, Priority::High)).unwrap();
        queue.offer(make("c", t0, Priority::Low)).unwrap();

        let heap = queue.lock().unwrap();
        assert_eq!(heap.count_by_priority(Priority::High), 2);
        assert_eq!(heap.count_by_priority(Priority::Low), 1);
        assert_eq!(heap.count_by_priority(Priority::Critical), 0);
    }
}
