use std::time::{Duration, Instant};

use serde::Serialize;
use sluice_core::{SluiceError, Task};

use super::TaskExecutor;
use crate::clock::{parse_schedule, parse_timezone};

/// Outcome of a `test` run. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestPreview {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Rows returned by the capped run.
    pub row_count: usize,
    pub elapsed_secs: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Append `LIMIT n` unless the statement already limits itself.
pub(crate) fn limit_sql(sql: &str, limit: usize) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let has_limit = trimmed
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .any(|token| token.eq_ignore_ascii_case("limit"));
    if has_limit {
        trimmed.to_string()
    } else {
        format!("{trimmed} LIMIT {limit}")
    }
}

impl TaskExecutor {
    /// Capped run of `task` with no lock, record or delivery.
    pub async fn preview(&self, task: &Task, row_limit: usize) -> TestPreview {
        let started = Instant::now();
        let validation = task.validate();
        let mut preview = TestPreview {
            errors: validation.errors,
            warnings: validation.warnings,
            ..Default::default()
        };

        if let Some(cron) = task.cron() {
            if let Err(e) = parse_schedule(cron) {
                preview.errors.push(e.to_string());
            }
        }
        if let Some(tz) = task.timezone.as_deref().filter(|t| !t.trim().is_empty()) {
            if let Err(e) = parse_timezone(tz) {
                preview.errors.push(e.to_string());
            }
        }
        if !preview.errors.is_empty() {
            return preview;
        }

        let row_limit = row_limit.max(1);
        let timeout = self.settings.timeout_for(task);
        let fetched =
            tokio::time::timeout(timeout, self.fetch(task, None, Some(row_limit), timeout)).await;

        match fetched {
            Err(_) => preview.errors.push(
                SluiceError::TimeoutExceeded {
                    secs: timeout.as_secs(),
                }
                .to_string(),
            ),
            Ok(Err(e)) => preview.errors.push(e.to_string()),
            Ok(Ok(mut result)) => {
                result.truncate(row_limit);
                preview.success = true;
                preview.row_count = result.rows.len();
                preview.columns = result.columns;
                preview.rows = result.rows;
            }
        }
        preview.elapsed_secs = round_millis(started.elapsed());

        tracing::info!(
            task_id = task.id,
            execution_type = task.body.execution_type(),
            success = preview.success,
            rows = preview.row_count,
            "test run finished"
        );
        preview
    }
}

fn round_millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0).round() / 1000.0
}
