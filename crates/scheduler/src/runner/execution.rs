use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::error::SchedulerError;
use crate::task::SharedTask;
use crate::types::{DispatchReport, Priority, TaskResult, TaskStatus};

use super::core::Shared;
use super::Scheduler;

impl Scheduler {
    /// Run one dispatch cycle now and return how many tasks were handed to
    /// the worker pool.
    ///
    /// Works whether or not the periodic dispatcher is running. Fails with
    /// [`SchedulerError::Shutdown`] after `shutdown()`.
    pub fn execute_due_tasks(&self) -> Result<usize, SchedulerError> {
        Ok(self.dispatch_due()?.count())
    }

    /// Like [`execute_due_tasks`](Self::execute_due_tasks), returning which
    /// tasks were dispatched and in what order.
    pub fn dispatch_due(&self) -> Result<DispatchReport, SchedulerError> {
        if self.shared.terminated.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        Ok(self.shared.tick())
    }
}

/// Decrements the in-flight counter when a worker finishes.
struct InFlightGuard<'a>(&'a Shared);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shared {
    /// One dispatcher cycle. Never fails: internal errors are logged and the
    /// cycle degrades to dispatching nothing.
    pub(super) fn tick(self: &Arc<Self>) -> DispatchReport {
        let now = self.clock.now();
        match self.dispatch(now) {
            Ok(report) => {
                if report.count() > 0 {
                    debug!(dispatched = report.count(), skipped = report.skipped, "Dispatch cycle");
                }
                report
            }
            Err(e) => {
                error!(error = %e, "Dispatch cycle failed");
                DispatchReport::empty(now)
            }
        }
    }

    fn dispatch(self: &Arc<Self>, now: DateTime<Utc>) -> Result<DispatchReport, SchedulerError> {
        let mut report = DispatchReport::empty(now);

        let batch: Vec<SharedTask> = {
            let mut heap = self.queue.lock()?;
            let due = heap.drain_due(now);

            let mut batch = Vec::with_capacity(due.len());
            for task in due {
                // Cancelled while still queued.
                if self.registry.contains(&task.id()) {
                    batch.push(task);
                } else {
                    report.skipped += 1;
                }
            }

            if let Ok(mut m) = self.metrics.write() {
                m.ticks += 1;
                for priority in Priority::ALL {
                    m.tasks_pending.insert(priority, heap.count_by_priority(priority));
                }
            }
            batch
        };

        for task in batch {
            // Cancelled between the drain and here.
            if !self.registry.contains(&task.id()) || !task.begin_run(now) {
                report.skipped += 1;
                continue;
            }
            report.dispatched.push(task.id());
            if let Ok(mut m) = self.metrics.write() {
                m.record_dispatch(task.name());
            }

            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let shared = Arc::clone(self);
            self.pool.spawn(move || shared.run_task(task, now));
        }

        Ok(report)
    }

    /// Worker body: execute, then either re-enqueue or retire the task.
    fn run_task(&self, task: SharedTask, now: DateTime<Utc>) {
        let _guard = InFlightGuard(self);
        let id = task.id();

        let started = Instant::now();
        let outcome = task.execute();
        let duration = started.elapsed();

        let mut rescheduled = false;
        let (status, error) = match outcome {
            Ok(()) => match task.recurrence().and_then(|r| r.next_after(now)) {
                Some(next) => match self.requeue(&task, next) {
                    Ok(requeued) => {
                        rescheduled = requeued;
                        (TaskStatus::Completed, None)
                    }
                    Err(e) => {
                        error!(task_id = %id, error = %e, "Failed to re-enqueue recurring task");
                        self.registry.remove(&id);
                        task.finish_run(TaskStatus::Failed);
                        (TaskStatus::Failed, Some(e.to_string()))
                    }
                },
                None => {
                    // One-shot, or a recurring task past its end bound.
                    self.registry.remove(&id);
                    task.finish_run(TaskStatus::Completed);
                    (TaskStatus::Completed, None)
                }
            },
            Err(e) => {
                self.registry.remove(&id);
                task.finish_run(TaskStatus::Failed);
                (TaskStatus::Failed, Some(e.to_string()))
            }
        };

        let result = TaskResult {
            task_id: id,
            task_name: task.name().to_string(),
            status,
            executed_at: now,
            duration,
            error,
            rescheduled,
        };

        if let Ok(mut m) = self.metrics.write() {
            m.record_execution(task.name(), duration, result.is_success());
        }
        self.record_result(result.clone());

        // A panic escaping a rayon job aborts the process.
        if panic::catch_unwind(AssertUnwindSafe(|| self.listener.on_result(&result))).is_err() {
            error!(task_id = %id, "Execution listener panicked");
        }
    }

    /// Put a recurring task back in the queue at `next`, unless it was
    /// cancelled while running. Returns whether it was re-enqueued.
    fn requeue(&self, task: &SharedTask, next: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let mut heap = self.queue.lock()?;
        if !self.registry.contains(&task.id()) {
            debug!(task_id = %task.id(), "Recurring task cancelled during run, not re-enqueued");
            return Ok(false);
        }
        task.set_scheduled_time(next);
        task.finish_run(TaskStatus::Pending);
        heap.offer(Arc::clone(task));
        Ok(true)
    }

    fn record_result(&self, result: TaskResult) {
        let capacity = self.config.result_history;
        if capacity == 0 {
            return;
        }
        match self.results.lock() {
            Ok(mut results) => {
                while results.len() >= capacity {
                    results.pop_front();
                }
                results.push_back(result);
            }
            Err(e) => warn!(error = %e, "Result history lock poisoned"),
        }
    }
}
