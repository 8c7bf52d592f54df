use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::SchedulerError;
use crate::types::{Priority, TaskId, TaskStatus};

/// Error returned (or panic caught) from a task action.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// The opaque unit of work a task runs.
///
/// Implemented for any `Fn() -> Result<(), TaskError>` closure.
pub trait TaskAction: Send + Sync {
    fn run(&self) -> Result<(), TaskError>;
}

impl<F> TaskAction for F
where
    F: Fn() -> Result<(), TaskError> + Send + Sync,
{
    fn run(&self) -> Result<(), TaskError> {
        self()
    }
}

/// A task as described by the caller, before the scheduler owns it.
///
/// Has no id; the scheduler assigns one when the task is registered.
pub struct Task {
    name: String,
    description: Option<String>,
    priority: Priority,
    until: Option<DateTime<Utc>>,
    action: Arc<dyn TaskAction>,
}

impl Task {
    pub fn new(name: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority: Priority::default(),
            until: None,
            action: Arc::new(action),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Last instant a recurring task may be due. Ignored for one-shot tasks.
    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.until = Some(end);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn end_bound(&self) -> Option<DateTime<Utc>> {
        self.until
    }

    /// Reject malformed tasks before anything is registered.
    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("task name must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("until", &self.until)
            .finish_non_exhaustive()
    }
}

/// Fixed-interval repetition of a task.
#[derive(Debug, Clone, Copy)]
pub struct Recurrence {
    interval: Duration,
    delta: TimeDelta,
    until: Option<DateTime<Utc>>,
}

impl Recurrence {
    pub(crate) fn new(
        interval: Duration,
        start: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(
                "recurring interval must be greater than zero".into(),
            ));
        }
        let delta = TimeDelta::from_std(interval).map_err(|_| {
            SchedulerError::InvalidInterval(format!("interval {:?} is out of range", interval))
        })?;
        if let Some(end) = until {
            if end < start {
                return Err(SchedulerError::InvalidTask(format!(
                    "recurrence end {} is before start {}",
                    end, start
                )));
            }
        }
        Ok(Self {
            interval,
            delta,
            until,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        self.until
    }

    /// Next due time after a run that belonged to the tick at `now`, or
    /// `None` once the end bound has been passed.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = now.checked_add_signed(self.delta)?;
        match self.until {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}

#[derive(Debug)]
struct TaskState {
    scheduled_time: DateTime<Utc>,
    priority: Priority,
    status: TaskStatus,
    run_count: u64,
    last_run: Option<DateTime<Utc>>,
}

/// A registered task. Shared via `Arc` between the registry, the due queue
/// and in-flight workers.
///
/// `scheduled_time` and `priority` are only changed by scheduler code that
/// holds the queue lock and has taken the task out of the heap first.
pub struct ScheduledTask {
    id: TaskId,
    name: String,
    description: Option<String>,
    action: Arc<dyn TaskAction>,
    recurrence: Option<Recurrence>,
    created_at: DateTime<Utc>,
    state: Mutex<TaskState>,
}

/// Shared handle to a registered task.
pub type SharedTask = Arc<ScheduledTask>;

impl ScheduledTask {
    pub(crate) fn new(
        id: TaskId,
        task: Task,
        when: DateTime<Utc>,
        recurrence: Option<Recurrence>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: task.name,
            description: task.description,
            action: task.action,
            recurrence,
            created_at,
            state: Mutex::new(TaskState {
                scheduled_time: when,
                priority: task.priority,
                status: TaskStatus::Pending,
                run_count: 0,
                last_run: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        // State is plain data and actions never run under this lock.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn recurrence(&self) -> Option<&Recurrence> {
        self.recurrence.as_ref()
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.state().scheduled_time
    }

    pub fn priority(&self) -> Priority {
        self.state().priority
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    pub fn run_count(&self) -> u64 {
        self.state().run_count
    }

    pub(crate) fn set_scheduled_time(&self, when: DateTime<Utc>) {
        self.state().scheduled_time = when;
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.state().priority = priority;
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.state().status = status;
    }

    /// Record the end of a run. A cancellation that landed mid-run wins.
    pub(crate) fn finish_run(&self, status: TaskStatus) {
        let mut state = self.state();
        if state.status != TaskStatus::Cancelled {
            state.status = status;
        }
    }

    /// Move to `Executing` for a run belonging to the tick at `now`.
    /// Refuses a task that has already been cancelled.
    pub(crate) fn begin_run(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state();
        if state.status == TaskStatus::Cancelled {
            return false;
        }
        state.status = TaskStatus::Executing;
        state.run_count += 1;
        state.last_run = Some(now);
        true
    }

    /// Run the action. Panics are caught and returned as
    /// [`TaskError::Panicked`].
    pub fn execute(&self) -> Result<(), TaskError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.action.run())) {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Copy of the task's current state, detached from the live task.
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            priority: state.priority,
            scheduled_time: state.scheduled_time,
            status: state.status,
            recurring: self.recurrence.is_some(),
            interval: self.recurrence.map(|r| r.interval()),
            until: self.recurrence.and_then(|r| r.until()),
            run_count: state.run_count,
            last_run: state.last_run,
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scheduled_time", &state.scheduled_time)
            .field("priority", &state.priority)
            .field("status", &state.status)
            .field("recurrence", &self.recurrence)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Read-only copy of a task, safe to hand out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub scheduled_time: DateTime<Utc>,
    pub status: TaskStatus,
    pub recurring: bool,
    pub interval: Option<Duration>,
    pub until: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Result<(), TaskError> {
        Ok(())
    }

    #[test]
    fn blank_name_is_invalid() {
        let task = Task::new("   ", noop);
        assert!(matches!(task.validate(), Err(SchedulerError::InvalidTask(_))));
        assert!(Task::new("report", noop).validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Recurrence::new(Duration::ZERO, Utc::now(), None).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInterval(_)));
    }

    #[test]
    fn recurrence_end_before_start_is_rejected() {
        let start = Utc::now();
        let err = Recurrence::new(
            Duration::from_secs(5),
            start,
            Some(start - TimeDelta::seconds(1)),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask(_)));
    }

    #[test]
    fn recurrence_stops_after_end_bound() {
        let start = Utc::now();
        let rec = Recurrence::new(
            Duration::from_secs(10),
            start,
            Some(start + TimeDelta::seconds(15)),
        )
        .unwrap();
        assert_eq!(rec.next_after(start), Some(start + TimeDelta::seconds(10)));
        assert_eq!(rec.next_after(start + TimeDelta::seconds(10)), None);
    }

    #[test]
    fn execute_catches_panics() {
        let task = Task::new("boom", || -> Result<(), TaskError> { panic!("kaboom") });
        let scheduled = ScheduledTask::new(TaskId::generate(), task, Utc::now(), None, Utc::now());
        match scheduled.execute() {
            Err(TaskError::Panicked(msg)) => assert!(msg.contains("kaboom")),
            other => panic!("expected panic error, got {:?}", other),
        }
    }

    #[test]
    fn cancelled_task_refuses_to_begin_run() {
        let now = Utc::now();
        let scheduled = ScheduledTask::new(TaskId::generate(), Task::new("late", noop), now, None, now);
        scheduled.set_status(TaskStatus::Cancelled);

        assert!(!scheduled.begin_run(now));
        assert_eq!(scheduled.status(), TaskStatus::Cancelled);
        assert_eq!(scheduled.run_count(), 0);

        scheduled.finish_run(TaskStatus::Completed);
        assert_eq!(scheduled.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn begin_run_marks_executing() {
        let now = Utc::now();
        let scheduled = ScheduledTask::new(TaskId::generate(), Task::new("run", noop), now, None, now);
        assert!(scheduled.begin_run(now));
        assert_eq!(scheduled.status(), TaskStatus::Executing);
        assert_eq!(scheduled.run_count(), 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let now = Utc::now();
        let scheduled = ScheduledTask::new(
            TaskId::generate(),
            Task::new("snap", noop).with_priority(Priority::High),
            now,
            None,
            now,
        );
        let snap = scheduled.snapshot();
        scheduled.set_priority(Priority::Low);

        assert_eq!(snap.priority, Priority::High);
        assert_eq!(scheduled.priority(), Priority::Low);
        assert_eq!(snap.status, TaskStatus::Pending);
        assert!(!snap.recurring);
    }
}
