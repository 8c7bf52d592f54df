use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::types::{SchedulerState, StopReport};

use super::core::{Shared, TimerHandle};
use super::Scheduler;

const IDLE_POLL: Duration = Duration::from_millis(5);

impl Scheduler {
    /// Start the periodic dispatcher. Calling `start` while running is a
    /// no-op.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            SchedulerState::Terminated => return Err(SchedulerError::Shutdown),
            SchedulerState::Running => {
                debug!("Scheduler already running");
                return Ok(());
            }
            SchedulerState::Stopped => {}
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let tick = self.shared.config.tick_interval();

        let join = std::thread::Builder::new()
            .name("duetime-dispatcher".into())
            .spawn(move || dispatcher_loop(shared, tick, stop_rx))
            .map_err(|e| SchedulerError::Dispatcher(format!("spawn duetime-dispatcher: {}", e)))?;

        lifecycle.timer = Some(TimerHandle { stop_tx, join });
        lifecycle.state = SchedulerState::Running;
        info!(tick_ms = tick.as_millis() as u64, "Scheduler started");
        Ok(())
    }

    /// Stop the periodic dispatcher and wait up to the configured grace
    /// period for in-flight tasks. Queued tasks stay queued; the scheduler
    /// can be started again.
    pub fn stop(&self) -> StopReport {
        {
            let mut lifecycle = self.lifecycle();
            if let Some(timer) = lifecycle.timer.take() {
                stop_timer(timer);
            }
            if lifecycle.state == SchedulerState::Running {
                lifecycle.state = SchedulerState::Stopped;
            }
        }

        let grace = self.shared.config.shutdown_grace();
        let report = if self.wait_idle(grace) {
            StopReport { abandoned: 0 }
        } else {
            let abandoned = self.shared.in_flight.load(Ordering::Acquire);
            warn!(
                abandoned,
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed with tasks still running"
            );
            StopReport { abandoned }
        };

        info!("Scheduler stopped");
        report
    }

    /// Stop for good. Afterwards `start` and manual dispatch return
    /// [`SchedulerError::Shutdown`]; scheduling calls are still accepted but
    /// will never run.
    pub fn shutdown(&self) -> StopReport {
        self.shared.terminated.store(true, Ordering::Release);
        let report = self.stop();
        self.lifecycle().state = SchedulerState::Terminated;
        info!("Scheduler shut down");
        report
    }

    /// Block until no task is executing or `timeout` elapses. Returns whether
    /// the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL.min(deadline - now));
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let timer = self
            .lifecycle
            .get_mut()
            .map(|l| l.timer.take())
            .unwrap_or_else(|e| e.into_inner().timer.take());
        if let Some(timer) = timer {
            stop_timer(timer);
        }
    }
}

fn stop_timer(timer: TimerHandle) {
    // A send error only means the thread already exited.
    let _ = timer.stop_tx.send(());
    if timer.join.join().is_err() {
        error!("Dispatcher thread panicked");
    }
}

/// Fixed-rate dispatch loop. The first cycle runs immediately.
fn dispatcher_loop(shared: Arc<Shared>, tick: Duration, stop_rx: mpsc::Receiver<()>) {
    let mut next = Instant::now();
    loop {
        if panic::catch_unwind(AssertUnwindSafe(|| shared.tick())).is_err() {
            error!("Dispatch cycle panicked, continuing");
        }

        next += tick;
        let now = Instant::now();
        if next < now {
            // Fell behind; do not burst to catch up.
            next = now;
        }
        match stop_rx.recv_timeout(next - now) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Dispatcher thread exiting");
}
