use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::task::{SharedTask, TaskSnapshot};
use crate::types::TaskId;

/// Authoritative store of live tasks, keyed by id.
///
/// A task that is not in the registry no longer exists as far as the
/// scheduler is concerned and must never be dispatched or re-enqueued.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, SharedTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns the previous task under `id`, if any.
    pub fn put(&self, id: TaskId, task: SharedTask) -> Option<SharedTask> {
        self.tasks.insert(id, task)
    }

    pub fn get(&self, id: &TaskId) -> Option<SharedTask> {
        self.tasks.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove and return the task. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &TaskId) -> Option<SharedTask> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshots of every live task, ordered by (scheduled time, priority).
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let mut out: Vec<TaskSnapshot> = self.tasks.iter().map(|e| e.value().snapshot()).collect();
        out.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then(a.priority.cmp(&b.priority))
        });
        out
    }

    /// Snapshots of live tasks due within `[start, end]` (inclusive).
    pub fn snapshot_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TaskSnapshot> {
        self.snapshot()
            .into_iter()
            .filter(|t| t.scheduled_time >= start && t.scheduled_time <= end)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::task::{ScheduledTask, Task, TaskError};

    fn make(name: &str, when: DateTime<Utc>) -> SharedTask {
        let task = Task::new(name, || -> Result<(), TaskError> { Ok(()) });
        Arc::new(ScheduledTask::new(TaskId::generate(), task, when, None, when))
    }

    #[test]
    fn put_get_remove() {
        let registry = TaskRegistry::new();
        let task = make("a", Utc::now());
        let id = task.id();

        assert!(registry.put(id, Arc::clone(&task)).is_none());
        assert_eq!(registry.get(&id).map(|t| t.id()), Some(id));
        assert!(registry.contains(&id));

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none(), "second remove is a no-op");
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn put_overwrites_rather_than_duplicates() {
        let registry = TaskRegistry::new();
        let task = make("a", Utc::now());
        let id = task.id();

        registry.put(id, Arc::clone(&task));
        let previous = registry.put(id, Arc::clone(&task));

        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn range_is_inclusive() {
        let registry = TaskRegistry::new();
        let t0 = Utc::now();
        for (name, offset) in [("early", -5), ("start", 0), ("mid", 5), ("end", 10), ("late", 11)] {
            let task = make(name, t0 + TimeDelta::seconds(offset));
            registry.put(task.id(), task);
        }

        let names: Vec<String> = registry
            .snapshot_in_range(t0, t0 + TimeDelta::seconds(10))
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["start", "mid", "end"]);
    }
}
