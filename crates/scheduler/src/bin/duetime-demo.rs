//! duetime-demo: walks through the scheduler's features, then lets the
//! periodic dispatcher run for a while.
//!
//! One-shot tasks at mixed priorities, a recurring task, a priority update,
//! a cancellation, a time-range query, and a task that fails.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use clap::Parser;
use tracing::info;

use duetime_scheduler::{
    Priority, Scheduler, SchedulerConfig, Task, TaskError, load_dotenv,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Priority task scheduler demo.
#[derive(Parser, Debug)]
#[command(name = "duetime-demo", version, about)]
struct Cli {
    /// Path to a scheduler TOML config file. Defaults plus env overrides if omitted.
    #[arg(long, env = "DUETIME_CONFIG")]
    config: Option<PathBuf>,

    /// How long to let the dispatcher run, in seconds.
    #[arg(long, env = "DUETIME_RUN_SECS", default_value_t = 10)]
    run_secs: u64,

    /// Print final task snapshots and metrics as JSON.
    #[arg(long)]
    json: bool,
}

fn say(message: &'static str) -> impl Fn() -> Result<(), TaskError> + Send + Sync + 'static {
    move || {
        info!(at = %Utc::now(), "{}", message);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SchedulerConfig::from_env().context("loading config from environment")?,
    };
    let scheduler = Scheduler::new(config)?;
    let now = Utc::now();

    // One-shot tasks: HIGH and LOW due together, HIGH goes first.
    let high = scheduler.schedule_task(
        Task::new("high", say("HIGH priority task executed")).with_priority(Priority::High),
        now + TimeDelta::seconds(2),
    )?;
    let low = scheduler.schedule_task(
        Task::new("low", say("LOW priority task executed")).with_priority(Priority::Low),
        now + TimeDelta::seconds(2),
    )?;
    let critical = scheduler.schedule_task(
        Task::new("critical", say("CRITICAL task executed")).with_priority(Priority::Critical),
        now + TimeDelta::seconds(5),
    )?;
    info!(%high, %low, %critical, "Scheduled one-shot tasks");

    // Recurring every 3 seconds.
    let recurring = scheduler.schedule_recurring_task(
        Task::new("recurring", say("Recurring task executed"))
            .with_description("heartbeat every 3s"),
        now + TimeDelta::seconds(1),
        Duration::from_secs(3),
    )?;
    info!(%recurring, "Scheduled recurring task");

    // Priority update.
    let promoted = scheduler.schedule_task(
        Task::new("promoted", say("Promoted task executed")).with_priority(Priority::Low),
        now + TimeDelta::seconds(7),
    )?;
    let updated = scheduler.update_task_priority(&promoted, Priority::High);
    info!(%promoted, updated, "Raised priority LOW -> HIGH");

    // Cancellation.
    let cancelled = scheduler.schedule_task(
        Task::new("cancelled", say("This should NOT execute")),
        now + TimeDelta::seconds(20),
    )?;
    info!(%cancelled, removed = scheduler.cancel_task(&cancelled), "Cancelled task");

    // Failure, reported but not retried.
    scheduler.schedule_task(
        Task::new("failing", || -> Result<(), TaskError> {
            Err(TaskError::failed("simulated failure"))
        }),
        now + TimeDelta::seconds(4),
    )?;

    // Range query.
    let upcoming = scheduler.tasks_in_range(now, now + TimeDelta::seconds(10));
    info!(count = upcoming.len(), "Tasks due in the next 10 seconds");
    for task in &upcoming {
        info!(task = %task.name, priority = ?task.priority, due = %task.scheduled_time, "  upcoming");
    }

    scheduler.start()?;
    info!(run_secs = cli.run_secs, "Scheduler running");
    std::thread::sleep(Duration::from_secs(cli.run_secs));

    let report = scheduler.shutdown();
    info!(abandoned = report.abandoned, "Scheduler stopped");

    let metrics = scheduler.metrics();
    if cli.json {
        let out = serde_json::json!({
            "remaining": scheduler.all_scheduled_tasks(),
            "results": scheduler.recent_results(),
            "metrics": metrics,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        info!(
            completed = metrics.total_completed(),
            failed = metrics.total_failed(),
            remaining = scheduler.task_count(),
            "Summary"
        );
    }

    Ok(())
}
