use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Priority;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Dispatcher cycles run (periodic and manual).
    pub ticks: u64,
    /// Tasks handed to the worker pool, by task name.
    pub tasks_dispatched: HashMap<String, u64>,
    /// Successful executions by task name.
    pub tasks_completed: HashMap<String, u64>,
    /// Failed executions by task name.
    pub tasks_failed: HashMap<String, u64>,
    /// Tasks waiting in the queue per priority level.
    pub tasks_pending: HashMap<Priority, usize>,
    /// Tasks currently inside a worker.
    pub in_flight: usize,
    /// In-flight / pool size (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Average action duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last execution time by task name.
    pub last_run: HashMap<String, DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_dispatch(&mut self, task_name: &str) {
        *self.tasks_dispatched.entry(task_name.to_string()).or_default() += 1;
    }

    /// Record a finished execution, successful or not.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration, success: bool) {
        let bucket = if success {
            &mut self.tasks_completed
        } else {
            &mut self.tasks_failed
        };
        *bucket.entry(task_name.to_string()).or_default() += 1;
        self.last_run.insert(task_name.to_string(), Utc::now());

        let count = self.tasks_completed.get(task_name).copied().unwrap_or(0)
            + self.tasks_failed.get(task_name).copied().unwrap_or(0);
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count <= 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_name.to_string(), new_avg);
    }

    pub fn total_completed(&self) -> u64 {
        self.tasks_completed.values().sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tasks_failed.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("test_task", Duration::from_millis(100), true);

        assert_eq!(m.tasks_completed["test_task"], 1);
        assert!(m.last_run.contains_key("test_task"));
        assert_eq!(m.avg_task_duration["test_task"], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("task", Duration::from_millis(100), true);
        m.record_execution("task", Duration::from_millis(200), false);

        assert_eq!(m.tasks_completed["task"], 1);
        assert_eq!(m.tasks_failed["task"], 1);
        // Average of 100ms and 200ms = 150ms
        let avg = m.avg_task_duration["task"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn totals_across_tasks() {
        let mut m = SchedulerMetrics::default();
        m.record_dispatch("a");
        m.record_execution("a", Duration::from_millis(1), true);
        m.record_execution("b", Duration::from_millis(1), true);
        m.record_execution("c", Duration::from_millis(1), false);

        assert_eq!(m.tasks_dispatched["a"], 1);
        assert_eq!(m.total_completed(), 2);
        assert_eq!(m.total_failed(), 1);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.ticks, 0);
        assert_eq!(m.in_flight, 0);
        assert_eq!(m.worker_utilization, 0.0);
        assert!(m.tasks_completed.is_empty());
    }
}
