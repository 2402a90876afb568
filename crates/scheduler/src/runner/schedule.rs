use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use sluice_core::{SluiceError, Task, TaskId};

use crate::clock::{next_fire_with, parse_schedule, parse_timezone};

struct Entry {
    task: Task,
    cron: String,
    tz: Tz,
    schedule: Schedule,
    next_fire: DateTime<Utc>,
}

/// A task that could not be scheduled during a reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadError {
    pub task_id: TaskId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadReport {
    /// Entries in the schedule after the reload.
    pub scheduled: usize,
    pub added: Vec<TaskId>,
    /// Entries whose cron expression or timezone changed.
    pub rescheduled: Vec<TaskId>,
    pub removed: Vec<TaskId>,
    pub errors: Vec<ReloadError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextFire {
    pub task_id: TaskId,
    pub task_name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub next_fire: DateTime<Utc>,
}

/// Result of one evaluation of the schedule.
#[derive(Debug, Default)]
pub(crate) struct Due {
    pub fire: Vec<Task>,
    /// Entries whose missed fires all fell outside the grace window.
    pub skipped: Vec<(TaskId, DateTime<Utc>)>,
}

/// Task id to next fire time. Owned by the coordinator only.
#[derive(Default)]
pub(crate) struct ScheduleTable {
    entries: HashMap<TaskId, Entry>,
}

impl ScheduleTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.contains_key(&task_id)
    }

    pub fn next_fire(&self, task_id: TaskId) -> Option<DateTime<Utc>> {
        self.entries.get(&task_id).map(|e| e.next_fire)
    }

    /// Replace the schedule with `tasks`.
    ///
    /// Entries whose cron expression and timezone are unchanged keep their next
    /// fire time, so repeated reloads produce the same schedule. New or changed
    /// entries fire strictly after `now`. A task that fails to parse is
    /// reported and left out.
    pub fn reload(&mut self, tasks: Vec<Task>, now: DateTime<Utc>, default_tz: Tz) -> ReloadReport {
        let mut report = ReloadReport::default();
        let mut previous = std::mem::take(&mut self.entries);

        for task in tasks {
            if !task.is_schedulable() {
                continue;
            }
            let task_id = task.id;
            match build_entry(task, previous.remove(&task_id), now, default_tz) {
                Ok((entry, change)) => {
                    match change {
                        Change::Added => report.added.push(task_id),
                        Change::Rescheduled => report.rescheduled.push(task_id),
                        Change::Kept => {}
                    }
                    self.entries.insert(task_id, entry);
                }
                Err(e) => {
                    tracing::warn!(task_id, error = %e, "task left out of schedule");
                    report.errors.push(ReloadError {
                        task_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        report.removed = previous.into_keys().collect();
        report.removed.sort_unstable();
        report.added.sort_unstable();
        report.rescheduled.sort_unstable();
        report.scheduled = self.entries.len();
        report
    }

    /// Collect due entries and move each one forward past `now`.
    ///
    /// An entry is fired once even if several of its fires were missed, as
    /// long as its latest missed fire is inside `grace`.
    pub fn take_due(&mut self, now: DateTime<Utc>, grace: Duration) -> Due {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let window_start = now.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent_after = window_start
            .checked_sub_signed(chrono::Duration::milliseconds(1))
            .unwrap_or(window_start);
        let mut due = Due::default();
        let mut finished = Vec::new();

        for (task_id, entry) in self.entries.iter_mut() {
            if entry.next_fire > now {
                continue;
            }

            // The earliest missed fire may be stale while a later one is not.
            let in_window = entry.next_fire >= window_start
                || next_fire_with(&entry.schedule, entry.tz, recent_after)
                    .is_some_and(|t| t <= now);
            if in_window {
                due.fire.push(entry.task.clone());
            } else {
                tracing::warn!(
                    task_id,
                    missed = %entry.next_fire,
                    "missed fire is older than the grace window, skipping"
                );
                due.skipped.push((*task_id, entry.next_fire));
            }

            match next_fire_with(&entry.schedule, entry.tz, now) {
                Some(next) => entry.next_fire = next,
                None => finished.push(*task_id),
            }
        }

        for task_id in finished {
            tracing::info!(task_id, "cron expression has no further fires, unscheduling");
            self.entries.remove(&task_id);
        }
        due.fire.sort_by_key(|t| t.id);
        due
    }

    /// Earliest next fire across all entries.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|e| e.next_fire).min()
    }

    pub fn next_fire_times(&self) -> Vec<NextFire> {
        let mut out: Vec<NextFire> = self
            .entries
            .values()
            .map(|e| NextFire {
                task_id: e.task.id,
                task_name: e.task.name.clone(),
                cron_expression: e.cron.clone(),
                timezone: e.tz.name().to_string(),
                next_fire: e.next_fire,
            })
            .collect();
        out.sort_by(|a, b| a.next_fire.cmp(&b.next_fire).then(a.task_id.cmp(&b.task_id)));
        out
    }
}

enum Change {
    Added,
    Rescheduled,
    Kept,
}

fn build_entry(
    task: Task,
    previous: Option<Entry>,
    now: DateTime<Utc>,
    default_tz: Tz,
) -> Result<(Entry, Change), SluiceError> {
    let cron = task.cron().unwrap_or_default().to_string();
    let tz = match task.timezone.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(name) => parse_timezone(name)?,
        None => default_tz,
    };
    let schedule = parse_schedule(&cron)?;

    let (next_fire, change) = match previous {
        Some(prev) if prev.cron == cron && prev.tz == tz => (prev.next_fire, Change::Kept),
        Some(_) => (first_fire(&schedule, tz, now, &cron)?, Change::Rescheduled),
        None => (first_fire(&schedule, tz, now, &cron)?, Change::Added),
    };
    Ok((
        Entry {
            task,
            cron,
            tz,
            schedule,
            next_fire,
        },
        change,
    ))
}

fn first_fire(
    schedule: &Schedule,
    tz: Tz,
    now: DateTime<Utc>,
    cron: &str,
) -> Result<DateTime<Utc>, SluiceError> {
    next_fire_with(schedule, tz, now).ok_or_else(|| SluiceError::InvalidCronExpression {
        expression: cron.to_string(),
        reason: "expression never fires again".to_string(),
    })
}
