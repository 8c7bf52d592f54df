use tracing::{info, warn};

use crate::types::TaskResult;

/// Sink for task execution outcomes, injected by the embedding application.
///
/// Called from worker threads after every execution; implementations must be
/// cheap or hand off to their own queue.
pub trait ExecutionListener: Send + Sync {
    fn on_result(&self, result: &TaskResult);
}

/// Default listener: reports outcomes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl ExecutionListener for TracingListener {
    fn on_result(&self, result: &TaskResult) {
        if result.is_success() {
            info!(
                task_id = %result.task_id,
                task = %result.task_name,
                duration_ms = result.duration.as_millis() as u64,
                rescheduled = result.rescheduled,
                "task completed"
            );
        } else {
            warn!(
                task_id = %result.task_id,
                task = %result.task_name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "task execution failed"
            );
        }
    }
}
