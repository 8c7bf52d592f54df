use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::listener::{ExecutionListener, TracingListener};
use crate::metrics::SchedulerMetrics;
use crate::queue::DueQueue;
use crate::registry::TaskRegistry;
use crate::types::{SchedulerState, TaskResult};

/// State shared between the facade, the dispatcher thread and workers.
pub(super) struct Shared {
    pub(super) config: SchedulerConfig,
    pub(super) registry: TaskRegistry,
    pub(super) queue: DueQueue,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) listener: Arc<dyn ExecutionListener>,
    pub(super) pool: rayon::ThreadPool,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    /// Most recent execution results, oldest at front.
    pub(super) results: Mutex<VecDeque<TaskResult>>,
    /// Tasks currently inside a worker.
    pub(super) in_flight: AtomicUsize,
    /// Set by `shutdown()`, never cleared.
    pub(super) terminated: AtomicBool,
}

/// Running dispatcher thread and the channel that stops it.
pub(super) struct TimerHandle {
    pub(super) stop_tx: Sender<()>,
    pub(super) join: JoinHandle<()>,
}

pub(super) struct Lifecycle {
    pub(super) state: SchedulerState,
    pub(super) timer: Option<TimerHandle>,
}

/// In-memory priority task scheduler.
///
/// Owns a [`TaskRegistry`] and a [`DueQueue`]; a periodic dispatcher drains
/// due tasks into a fixed-size worker pool. Every instance is independent.
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
    pub(super) lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    /// Create a stopped scheduler on the system clock.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        SchedulerBuilder::new(config).build()
    }

    /// Create a stopped scheduler with an injected clock.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        SchedulerBuilder::new(config).clock(clock).build()
    }

    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self
            .shared
            .metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let in_flight = self.shared.in_flight.load(Ordering::Relaxed);
        snapshot.in_flight = in_flight;
        snapshot.worker_utilization = in_flight as f64 / self.shared.config.worker_pool_size as f64;
        snapshot
    }

    /// Most recent execution results, oldest first.
    pub fn recent_results(&self) -> Vec<TaskResult> {
        self.shared
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Number of tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SchedulerState {
        self.lifecycle().state
    }

    pub(super) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builder for a [`Scheduler`] with a custom clock or execution listener.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn ExecutionListener>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            listener: Arc::new(TracingListener),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_pool_size)
            .thread_name(|i| format!("duetime-worker-{}", i))
            .build()
            .map_err(|e| SchedulerError::WorkerPool(e.to_string()))?;

        info!(
            workers = self.config.worker_pool_size,
            tick_ms = self.config.tick_interval_millis,
            "Scheduler created"
        );

        let shared = Shared {
            config: self.config,
            registry: TaskRegistry::new(),
            queue: DueQueue::new(),
            clock: self.clock,
            listener: self.listener,
            pool,
            metrics: RwLock::new(SchedulerMetrics::default()),
            results: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        };

        Ok(Scheduler {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle {
                state: SchedulerState::Stopped,
                timer: None,
            }),
        })
    }
}
