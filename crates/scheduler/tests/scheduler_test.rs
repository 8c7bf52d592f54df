//! End-to-end tests through the public API only.
//!
//! Time is simulated with `ManualClock`; worker completion is awaited with
//! `wait_idle`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use duetime_scheduler::{
    ManualClock, Priority, Scheduler, SchedulerConfig, Task, TaskError, TaskStatus,
};

const IDLE: Duration = Duration::from_secs(5);

#[test]
fn mixed_workload_over_simulated_minute() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let scheduler = Scheduler::with_clock(SchedulerConfig::default(), Arc::new(clock.clone())).unwrap();

    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let log = Arc::clone(&log);
        Task::new(name, move || -> Result<(), TaskError> {
            log.lock().unwrap().push(name);
            Ok(())
        })
    };

    let heartbeat = scheduler
        .schedule_recurring_task(record("heartbeat"), t0, Duration::from_secs(20))
        .unwrap();
    scheduler
        .schedule_task(record("report").with_priority(Priority::High), t0 + TimeDelta::seconds(30))
        .unwrap();
    let doomed = scheduler
        .schedule_task(record("doomed"), t0 + TimeDelta::seconds(40))
        .unwrap();
    assert!(scheduler.cancel_task(&doomed));

    for _ in 0..=60 {
        scheduler.execute_due_tasks().unwrap();
        assert!(scheduler.wait_idle(IDLE));
        clock.advance(Duration::from_secs(1));
    }

    let log = log.lock().unwrap();
    assert_eq!(log.iter().filter(|n| **n == "heartbeat").count(), 4, "t=0,20,40,60");
    assert_eq!(log.iter().filter(|n| **n == "report").count(), 1);
    assert!(!log.contains(&"doomed"));

    let snap = scheduler.task(&heartbeat).unwrap();
    assert_eq!(snap.run_count, 4);
    assert_eq!(snap.scheduled_time, t0 + TimeDelta::seconds(80));
    assert_eq!(scheduler.all_scheduled_tasks().len(), 1);
}

#[test]
fn concurrent_callers_never_duplicate_or_lose_tasks() {
    let t0 = Utc::now();
    let scheduler = Arc::new(
        Scheduler::with_clock(SchedulerConfig::default(), Arc::new(ManualClock::new(t0))).unwrap(),
    );
    let executed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|thread| {
            let scheduler = Arc::clone(&scheduler);
            let executed = Arc::clone(&executed);
            std::thread::spawn(move || {
                let mut cancelled = 0;
                for i in 0..50 {
                    let executed = Arc::clone(&executed);
                    let id = scheduler
                        .schedule_task(
                            Task::new(format!("w{}-{}", thread, i), move || -> Result<(), TaskError> {
                                executed.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            }),
                            t0,
                        )
                        .unwrap();
                    if i % 5 == 0 && scheduler.cancel_task(&id) {
                        cancelled += 1;
                    }
                    if i % 7 == 0 {
                        scheduler.execute_due_tasks().unwrap();
                    }
                }
                cancelled
            })
        })
        .collect();

    let cancelled: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    scheduler.execute_due_tasks().unwrap();
    assert!(scheduler.wait_idle(IDLE));

    // A cancel can land while the task is already executing, in which case
    // it both runs and counts as cancelled.
    let executed = executed.load(Ordering::SeqCst);
    assert!(executed <= 200);
    assert!(executed + cancelled >= 200);
    assert_eq!(scheduler.task_count(), 0);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn failed_task_status_is_visible_in_results() {
    let t0 = Utc::now();
    let scheduler =
        Scheduler::with_clock(SchedulerConfig::default(), Arc::new(ManualClock::new(t0))).unwrap();

    let id = scheduler
        .schedule_task(
            Task::new("flaky", || -> Result<(), TaskError> { Err(TaskError::failed("timeout")) }),
            t0,
        )
        .unwrap();
    scheduler.execute_due_tasks().unwrap();
    assert!(scheduler.wait_idle(IDLE));

    assert!(scheduler.task(&id).is_none());
    let result = scheduler
        .recent_results()
        .into_iter()
        .find(|r| r.task_id == id)
        .expect("result recorded");
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.executed_at, t0);
}
