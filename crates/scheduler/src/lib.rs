//! In-memory priority task scheduler.
//!
//! Pending work is ordered by (due time, priority) in a mutex-guarded heap.
//! A periodic dispatcher drains due tasks into a fixed-size rayon worker
//! pool; recurring tasks are re-enqueued after each successful run, failed
//! tasks are retired and reported.

pub mod clock;
pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod task;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SchedulerConfig, load_dotenv};
pub use error::SchedulerError;
pub use listener::{ExecutionListener, TracingListener};
pub use metrics::SchedulerMetrics;
pub use queue::{DueHeap, DueQueue};
pub use registry::TaskRegistry;
pub use runner::{Scheduler, SchedulerBuilder};
pub use task::{Recurrence, ScheduledTask, SharedTask, Task, TaskAction, TaskError, TaskSnapshot};
pub use types::{
    DispatchReport, Priority, SchedulerState, StopReport, TaskId, TaskResult, TaskStatus,
};
