//! Cron evaluation and the injectable wall clock.

use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use sluice_core::SluiceError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`;
/// tasks are written in standard 5-field crontab form.
pub(crate) fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn parse_schedule(expr: &str) -> Result<Schedule, SluiceError> {
    Schedule::from_str(&normalize_cron(expr)).map_err(|e| SluiceError::InvalidCronExpression {
        expression: expr.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, SluiceError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| SluiceError::InvalidTimezone(name.to_string()))
}

/// First fire of `schedule` in `tz` strictly after `after`.
pub(crate) fn next_fire_with(
    schedule: &Schedule,
    tz: Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .map(|t| t.with_timezone(&Utc))
        .take(4)
        .find(|t| *t > after)
}

/// Next instant at which `cron_expression`, read in `timezone`, fires
/// strictly after `after`. `None` when the expression never fires again.
pub fn next_fire_after(
    cron_expression: &str,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SluiceError> {
    let schedule = parse_schedule(cron_expression)?;
    Ok(next_fire_with(&schedule, timezone, after))
}

/// Source of "now" for the coordinator.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
