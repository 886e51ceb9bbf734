//! In-process report schedule.
//!
//! Cron expressions are evaluated in UTC. A ticker checks the schedule at a
//! fixed interval and delivers every report whose fire time has passed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::bot::{Bot, ReportKind};

/// How often the ticker looks for due jobs.
pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

/// Parse a cron expression. Classic five-field expressions get a leading
/// seconds field of `0`.
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, String> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&normalized).map_err(|e| format!("invalid cron '{expr}': {e}"))
}

/// Next fire time strictly after `after`.
pub fn next_cron_fire(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

struct ScheduledJob {
    kind: ReportKind,
    schedule: cron::Schedule,
    next_fire: Option<DateTime<Utc>>,
}

/// Set of scheduled report jobs.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job; its first fire time is computed from `now`.
    pub fn add(&mut self, kind: ReportKind, schedule: cron::Schedule, now: DateTime<Utc>) {
        let next_fire = next_cron_fire(&schedule, now);
        info!(
            report = kind.label(),
            next_fire = ?next_fire,
            "Report scheduled"
        );
        self.jobs.push(ScheduledJob {
            kind,
            schedule,
            next_fire,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs due at `now`. Each due job is advanced past `now`, so a job
    /// fires at most once per call even after a long pause.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<ReportKind> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_fire.is_some_and(|t| t <= now) {
                due.push(job.kind);
                job.next_fire = next_cron_fire(&job.schedule, now);
            }
        }
        due
    }
}

/// Spawn the ticker that delivers due reports to the owner chat.
pub fn spawn_cron_ticker(
    mut scheduler: Scheduler,
    bot: Arc<Bot>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            for kind in scheduler.due(Utc::now()) {
                if let Err(e) = bot.deliver_to_owner(kind).await {
                    error!(report = kind.label(), error = %e, "Scheduled report failed");
                }
            }
        }
    })
}
