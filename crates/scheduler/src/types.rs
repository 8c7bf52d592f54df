use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, assigned by the scheduler at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Task urgency. Lower numeric value = more urgent.
///
/// Used as the tiebreak between tasks due at the same instant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    /// Must run before anything else due at the same time.
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    /// Runs last among tasks due at the same time.
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting in the queue for its due time.
    Pending,
    /// Handed to a worker, action in flight.
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    /// Whether the task can no longer run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }
}

/// Outcome of a single task execution, reported to listeners and kept in the
/// scheduler's recent-results ring.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub task_name: String,
    /// `Completed` or `Failed`. A recurring task that will run again still
    /// reports `Completed` for this run.
    pub status: TaskStatus,
    /// Dispatch tick timestamp the run belonged to.
    pub executed_at: DateTime<Utc>,
    /// Wall-clock time spent inside the action.
    pub duration: Duration,
    pub error: Option<String>,
    /// Whether the task was put back in the queue afterwards.
    pub rescheduled: bool,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// What one dispatcher cycle handed to the worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// The "now" the cycle compared due times against.
    pub at: DateTime<Utc>,
    /// Dispatched task ids in submission order: (due time, priority).
    pub dispatched: Vec<TaskId>,
    /// Queue entries dropped because their task had already left the registry.
    pub skipped: usize,
}

impl DispatchReport {
    pub(crate) fn empty(at: DateTime<Utc>) -> Self {
        Self {
            at,
            dispatched: Vec::new(),
            skipped: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.dispatched.len()
    }
}

/// Outcome of `stop()` / `shutdown()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Executions still running when the grace period ran out. They are left
    /// to finish on their own; threads cannot be interrupted.
    pub abandoned: usize,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned == 0
    }
}

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Accepts work, no periodic dispatch. Manual dispatch still works.
    Stopped,
    /// Periodic dispatcher running.
    Running,
    /// After `shutdown()`: no dispatch of any kind, cannot be restarted.
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn task_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("task-"));
    }
}
