use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice_core::{SluiceError, Task, TaskId};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::schedule::{NextFire, ReloadReport};
use crate::flight::InFlightRun;
use crate::metrics::SchedulerMetrics;

/// Requests handed to the coordinator, which owns the schedule.
pub(crate) enum Command {
    Reload {
        tasks: Vec<Task>,
        reply: oneshot::Sender<ReloadReport>,
    },
    ExecuteNow {
        task: Task,
        reply: oneshot::Sender<Result<Uuid, SluiceError>>,
    },
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub size: usize,
    pub busy: usize,
    pub queue_capacity: usize,
    pub queued: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub scheduler_running: bool,
    pub started_at: DateTime<Utc>,
    /// Entries in the live schedule.
    pub active_task_count: usize,
    pub next_fire_times: Vec<NextFire>,
    pub in_flight: Vec<InFlightRun>,
    /// Accepted jobs waiting for room in the worker queue.
    pub backlog: usize,
    pub workers: WorkerStatus,
    pub metrics: SchedulerMetrics,
}
