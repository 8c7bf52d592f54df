use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::error::SchedulerError;
use crate::task::{Recurrence, ScheduledTask, Task, TaskSnapshot};
use crate::types::{Priority, TaskId, TaskStatus};

use super::Scheduler;

impl Scheduler {
    /// Register a one-shot task due at `when`. Past-due tasks run on the next
    /// dispatch cycle.
    pub fn schedule_task(&self, task: Task, when: DateTime<Utc>) -> Result<TaskId, SchedulerError> {
        task.validate()?;
        self.register(task, when, None)
    }

    /// Register a task that runs at `start` and then every `interval` after
    /// each successful run, until its optional end bound.
    pub fn schedule_recurring_task(
        &self,
        task: Task,
        start: DateTime<Utc>,
        interval: Duration,
    ) -> Result<TaskId, SchedulerError> {
        task.validate()?;
        let recurrence = Recurrence::new(interval, start, task.end_bound())?;
        self.register(task, start, Some(recurrence))
    }

    fn register(
        &self,
        task: Task,
        when: DateTime<Utc>,
        recurrence: Option<Recurrence>,
    ) -> Result<TaskId, SchedulerError> {
        let id = TaskId::generate();
        let created_at = self.shared.clock.now();
        let scheduled = Arc::new(ScheduledTask::new(id, task, when, recurrence, created_at));

        self.shared.registry.put(id, Arc::clone(&scheduled));
        if let Err(e) = self.shared.queue.offer(Arc::clone(&scheduled)) {
            self.shared.registry.remove(&id);
            return Err(e);
        }

        info!(
            task_id = %id,
            task = scheduled.name(),
            priority = ?scheduled.priority(),
            due = %when,
            recurring = scheduled.is_recurring(),
            "Scheduled task"
        );
        Ok(id)
    }

    /// Cancel a task. Returns `false` if the id is unknown or already gone.
    ///
    /// A run already inside a worker is not interrupted, but the task will
    /// not be re-enqueued afterwards.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let Some(task) = self.shared.registry.remove(id) else {
            return false;
        };
        task.set_status(TaskStatus::Cancelled);

        // The dispatcher skips entries whose task left the registry, so a
        // poisoned queue only leaves a stale entry behind.
        match self.shared.queue.lock() {
            Ok(mut heap) => {
                heap.remove(id);
            }
            Err(e) => error!(task_id = %id, error = %e, "Failed to remove cancelled task from queue"),
        }

        info!(task_id = %id, task = task.name(), "Cancelled task");
        true
    }

    /// Change a task's priority, repositioning it in the queue.
    ///
    /// For a task that is executing right now, only its next enqueue (if
    /// recurring) is affected.
    pub fn update_task_priority(&self, id: &TaskId, priority: Priority) -> bool {
        let Some(task) = self.shared.registry.get(id) else {
            return false;
        };

        let mut heap = match self.shared.queue.lock() {
            Ok(heap) => heap,
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to lock queue for priority update");
                return false;
            }
        };
        // Cancelled between lookup and lock.
        if !self.shared.registry.contains(id) {
            return false;
        }

        let queued = heap.remove(id).is_some();
        task.set_priority(priority);
        if queued {
            heap.offer(task);
        }

        debug!(task_id = %id, ?priority, queued, "Updated task priority");
        true
    }

    /// Move a pending task to a new due time, earlier or later.
    ///
    /// Returns `false` if the task is unknown or not currently waiting in the
    /// queue (e.g. executing).
    pub fn reschedule_task(&self, id: &TaskId, when: DateTime<Utc>) -> bool {
        let mut heap = match self.shared.queue.lock() {
            Ok(heap) => heap,
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to lock queue for reschedule");
                return false;
            }
        };
        if !self.shared.registry.contains(id) {
            return false;
        }
        let Some(task) = heap.remove(id) else {
            return false;
        };

        task.set_scheduled_time(when);
        heap.offer(task);

        debug!(task_id = %id, due = %when, "Rescheduled task");
        true
    }

    /// Snapshot of a single live task.
    pub fn task(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.shared.registry.get(id).map(|t| t.snapshot())
    }

    /// Snapshots of every live task, ordered by (due time, priority).
    pub fn all_scheduled_tasks(&self) -> Vec<TaskSnapshot> {
        self.shared.registry.snapshot()
    }

    /// Snapshots of live tasks due within `[start, end]`.
    pub fn tasks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TaskSnapshot> {
        self.shared.registry.snapshot_in_range(start, end)
    }

    /// Number of live tasks (pending or executing).
    pub fn task_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Number of tasks waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.len().unwrap_or(0)
    }
}
