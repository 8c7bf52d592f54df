use thiserror::Error;

/// Errors surfaced synchronously by the scheduler API.
///
/// Asynchronous task failures never show up here; they are reported through
/// [`TaskResult`](crate::types::TaskResult)s and the execution listener.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("scheduler has been shut down")]
    Shutdown,

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("dispatcher thread error: {0}")]
    Dispatcher(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
