use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice_core::{ExecutionStatus, TaskId};

/// Scheduler operational metrics exposed through `get_status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Finished runs per task.
    pub executions: HashMap<TaskId, u64>,
    /// Runs that ended `failed`, per task.
    pub failures: HashMap<TaskId, u64>,
    /// Runs that ended `cancelled`, per task.
    pub cancellations: HashMap<TaskId, u64>,
    /// Average run duration in seconds, per task.
    pub avg_duration_secs: HashMap<TaskId, f64>,
    /// Last terminal time per task.
    pub last_run: HashMap<TaskId, DateTime<Utc>>,
    /// Scheduled fires skipped because they were older than the grace window.
    pub misfires_skipped: u64,
    /// Fires or manual requests rejected by the single-flight check.
    pub rejected_already_running: u64,
    /// Jobs parked because the worker queue was full.
    pub backlog_deferrals: u64,
    /// Worker utilization ratio (0.0 - 1.0) at the last status read.
    pub worker_utilization: f64,
}

impl SchedulerMetrics {
    /// Record a finished run.
    pub fn record_execution(&mut self, task_id: TaskId, status: ExecutionStatus, duration: Duration) {
        *self.executions.entry(task_id).or_default() += 1;
        match status {
            ExecutionStatus::Failed => *self.failures.entry(task_id).or_default() += 1,
            ExecutionStatus::Cancelled => *self.cancellations.entry(task_id).or_default() += 1,
            _ => {}
        }
        self.last_run.insert(task_id, Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.executions[&task_id] as f64;
        let current = duration.as_secs_f64();
        let avg = self.avg_duration_secs.entry(task_id).or_insert(current);
        if count > 1.0 {
            *avg += (current - *avg) / count;
        }
    }
}
