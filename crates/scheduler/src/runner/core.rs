use std::collections::VecDeque;
use std::sync::Arc;

use sluice_core::config::SchedulerConfig;
use sluice_core::{SluiceError, TaskId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::commands::{Command, SchedulerStatus};
use super::coordinator::Coordinator;
use super::schedule::{ReloadReport, ScheduleTable};
use crate::clock::Clock;
use crate::executor::{TaskExecutor, TestPreview};
use crate::pool::WorkerPool;

const COMMAND_BUFFER: usize = 64;

/// A running scheduler: the coordinator task plus its worker pool.
pub struct Scheduler {
    handle: SchedulerHandle,
    coordinator: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the coordinator and worker pool. The schedule starts empty; call
    /// [`SchedulerHandle::reload_schedule`] to load tasks.
    pub fn start(config: SchedulerConfig, executor: Arc<TaskExecutor>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let pool = WorkerPool::spawn(
            config.resolved_workers(),
            config.queue_capacity,
            Arc::clone(&executor),
        );
        let coordinator = Coordinator {
            table: ScheduleTable::default(),
            commands: rx,
            executor: Arc::clone(&executor),
            pool,
            backlog: VecDeque::new(),
            started_at: clock.now(),
            clock,
            config,
        };

        Self {
            handle: SchedulerHandle { tx, executor },
            coordinator: tokio::spawn(coordinator.run()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop firing, cancel in-flight runs and wait for workers to drain.
    pub async fn shutdown(self) {
        let _ = self.handle.tx.send(Command::Shutdown).await;
        if let Err(e) = self.coordinator.await {
            tracing::error!(error = %e, "scheduler coordinator panicked");
        }
    }
}

/// Cloneable control surface for a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    executor: Arc<TaskExecutor>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SluiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SluiceError::SchedulerUnavailable)?;
        rx.await.map_err(|_| SluiceError::SchedulerUnavailable)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Re-read active scheduled tasks and replace the live schedule.
    pub async fn reload_schedule(&self) -> Result<ReloadReport, SluiceError> {
        let tasks = self
            .executor
            .repository()
            .list_active_scheduled_tasks()
            .await?;
        self.request(|reply| Command::Reload { tasks, reply }).await
    }

    /// Start a manual run regardless of the task's status or cron.
    ///
    /// Returns once the run is accepted; the run finishes in the background.
    pub async fn execute_now(&self, task_id: TaskId) -> Result<Uuid, SluiceError> {
        let task = self.executor.repository().get(task_id).await?;
        self.request(|reply| Command::ExecuteNow { task, reply }).await?
    }

    /// Request cancellation of the task's active run. False when none is active.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool, SluiceError> {
        self.request(|reply| Command::Cancel { task_id, reply }).await
    }

    pub async fn get_status(&self) -> Result<SchedulerStatus, SluiceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Capped preview of a task. Does not touch the schedule or single-flight.
    pub async fn test_task(
        &self,
        task_id: TaskId,
        row_limit: Option<usize>,
    ) -> Result<TestPreview, SluiceError> {
        let task = self.executor.repository().get(task_id).await?;
        let limit = row_limit.unwrap_or(self.executor.settings().test_row_limit);
        Ok(self.executor.preview(&task, limit).await)
    }
}
