//! In-process task scheduler.
//!
//! Each schedule is armed as a tokio task that sleeps until the next fire
//! time and then reports a [`FiredTask`] on the scheduler's channel. One-shot
//! schedules remove themselves after firing; cron schedules re-arm.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};

/// When a task should run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScheduleKind {
    /// Once, at a fixed instant.
    Scheduled { date: DateTime<Utc> },
    /// Once, after a delay.
    Delayed { seconds: u64 },
    /// Repeatedly, per a cron expression.
    Cron { expression: String },
}

/// A registered schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub description: String,
    pub kind: ScheduleKind,
    #[serde(rename = "nextRun")]
    pub next_run: DateTime<Utc>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Delivered to the listener when a schedule fires.
#[derive(Debug, Clone)]
pub struct FiredTask {
    pub description: String,
    pub schedule: Schedule,
}

struct Entry {
    schedule: Schedule,
    handle: JoinHandle<()>,
}

struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    fired: mpsc::UnboundedSender<FiredTask>,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let entries = self
            .entries
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
    }
}

/// Cheap-to-clone handle; all clones share the same schedules.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("scheduled", &self.inner.entries().len())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler and the receiver its fired tasks arrive on.
    ///
    /// The receiver ends once every clone of the scheduler is dropped.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FiredTask>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            fired,
        });
        (Self { inner }, rx)
    }

    /// Register and arm a schedule.
    pub fn schedule(&self, description: impl Into<String>, kind: ScheduleKind) -> Result<Schedule> {
        let now = Utc::now();
        let next_run = first_run(&kind, now)?;
        let schedule = Schedule {
            id: short_id(),
            description: description.into(),
            kind,
            next_run,
            created_at: now,
        };

        let mut entries = self.inner.entries();
        let handle = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            schedule.clone(),
        ));
        entries.insert(
            schedule.id.clone(),
            Entry {
                schedule: schedule.clone(),
                handle,
            },
        );
        info!(schedule_id = %schedule.id, next_run = %schedule.next_run, "task scheduled");
        Ok(schedule)
    }

    /// Active schedules, soonest first.
    pub fn list(&self) -> Vec<Schedule> {
        let mut schedules: Vec<Schedule> = self
            .inner
            .entries()
            .values()
            .map(|entry| entry.schedule.clone())
            .collect();
        schedules.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.id.cmp(&b.id)));
        schedules
    }

    pub fn get(&self, id: &str) -> Option<Schedule> {
        self.inner
            .entries()
            .get(id)
            .map(|entry| entry.schedule.clone())
    }

    /// Remove a schedule and stop its timer. Returns false if unknown.
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.entries().remove(id) {
            Some(entry) => {
                entry.handle.abort();
                info!(schedule_id = %id, "schedule canceled");
                true
            }
            None => false,
        }
    }
}

async fn run_timer(inner: Weak<Inner>, mut schedule: Schedule) {
    let mut delay = match &schedule.kind {
        ScheduleKind::Delayed { seconds } => Duration::from_secs(*seconds),
        _ => until(schedule.next_run),
    };

    loop {
        tokio::time::sleep(delay).await;

        let Some(shared) = inner.upgrade() else {
            return;
        };
        debug!(schedule_id = %schedule.id, "schedule fired");
        let fired = FiredTask {
            description: schedule.description.clone(),
            schedule: schedule.clone(),
        };
        if shared.fired.send(fired).is_err() {
            warn!(schedule_id = %schedule.id, "no listener for fired task");
        }

        let ScheduleKind::Cron { expression } = &schedule.kind else {
            shared.entries().remove(&schedule.id);
            return;
        };
        match next_cron_run(expression, Utc::now().max(schedule.next_run)) {
            Ok(next) => {
                schedule.next_run = next;
                if let Some(entry) = shared.entries().get_mut(&schedule.id) {
                    entry.schedule.next_run = next;
                }
                delay = until(next);
            }
            Err(err) => {
                warn!(schedule_id = %schedule.id, error = %err, "cron schedule exhausted");
                shared.entries().remove(&schedule.id);
                return;
            }
        }
    }
}

fn until(instant: DateTime<Utc>) -> Duration {
    (instant - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

fn first_run(kind: &ScheduleKind, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match kind {
        ScheduleKind::Scheduled { date } => {
            if *date <= now {
                return Err(AgentError::Schedule(format!(
                    "scheduled date {date} is in the past"
                )));
            }
            Ok(*date)
        }
        ScheduleKind::Delayed { seconds } => {
            if *seconds == 0 {
                return Err(AgentError::Schedule("delay must be at least one second".into()));
            }
            let too_large = || AgentError::Schedule(format!("delay of {seconds}s is too large"));
            let seconds = i64::try_from(*seconds).map_err(|_| too_large())?;
            chrono::TimeDelta::try_seconds(seconds)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(too_large)
        }
        ScheduleKind::Cron { expression } => next_cron_run(expression, now),
    }
}

/// Next fire time for a cron expression after `after`.
///
/// Accepts both the six-field form (with seconds) and the common five-field
/// form, which fires at second zero.
pub fn next_cron_run(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    let parsed = cron::Schedule::from_str(&normalized)
        .map_err(|e| AgentError::Schedule(format!("invalid cron expression '{trimmed}': {e}")))?;
    parsed
        .after(&after)
        .next()
        .ok_or_else(|| AgentError::Schedule(format!("cron expression '{trimmed}' never fires")))
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Scheduling directive for the system prompt.
pub fn schedule_prompt(now: DateTime<Utc>) -> String {
    format!(
        "[Schedule Parser Component]\n\
         Current time: {now}\n\n\
         When the user asks to schedule a task, call scheduleTask with a `when` object of one of \
         these forms:\n\
         - {{\"type\": \"scheduled\", \"date\": \"<RFC 3339 timestamp>\"}} for a specific date and time\n\
         - {{\"type\": \"delayed\", \"delayInSeconds\": <seconds>}} for a delay from now\n\
         - {{\"type\": \"cron\", \"cron\": \"<cron expression>\"}} for recurring tasks\n\
         - {{\"type\": \"no-schedule\"}} if the request has no usable time\n\
         Resolve relative times against the current time above.",
        now = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )
}
