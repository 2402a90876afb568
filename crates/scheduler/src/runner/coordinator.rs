use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sluice_core::config::SchedulerConfig;
use sluice_core::{SluiceError, Task, TriggerKind};
use tokio::sync::mpsc;

use super::commands::{Command, SchedulerStatus, WorkerStatus};
use super::schedule::ScheduleTable;
use crate::clock::Clock;
use crate::executor::{Job, TaskExecutor};
use crate::pool::WorkerPool;

/// Longest sleep when nothing is scheduled.
const IDLE_WAKE: Duration = Duration::from_secs(60);

/// Single owner of the schedule. Fires due entries, hands jobs to the pool
/// and serves commands from [`super::SchedulerHandle`].
pub(super) struct Coordinator {
    pub(super) table: ScheduleTable,
    pub(super) commands: mpsc::Receiver<Command>,
    pub(super) executor: Arc<TaskExecutor>,
    pub(super) pool: WorkerPool,
    /// Accepted jobs the pool had no room for, oldest first.
    pub(super) backlog: VecDeque<Job>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: SchedulerConfig,
    pub(super) started_at: DateTime<Utc>,
}

impl Coordinator {
    pub(super) async fn run(mut self) {
        tracing::info!(
            workers = self.pool.size(),
            queue_capacity = self.pool.capacity(),
            misfire_grace_secs = self.config.misfire_grace_secs,
            "scheduler started"
        );

        loop {
            let wait = self.sleep_for(self.clock.now());
            let command = tokio::select! {
                cmd = self.commands.recv() => Some(cmd),
                _ = tokio::time::sleep(wait) => None,
            };

            self.drain_backlog();
            self.fire_due(self.clock.now()).await;

            match command {
                None => {}
                Some(None) | Some(Some(Command::Shutdown)) => break,
                Some(Some(cmd)) => self.handle(cmd).await,
            }
        }

        self.stop().await;
    }

    fn sleep_for(&self, now: DateTime<Utc>) -> Duration {
        if !self.backlog.is_empty() {
            return self.config.redispatch_delay();
        }
        match self.table.next_wake() {
            Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).min(IDLE_WAKE),
            None => IDLE_WAKE,
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Reload { tasks, reply } => {
                let report = self.table.reload(
                    tasks,
                    self.clock.now(),
                    self.executor.default_timezone(),
                );
                tracing::info!(
                    scheduled = report.scheduled,
                    added = report.added.len(),
                    rescheduled = report.rescheduled.len(),
                    removed = report.removed.len(),
                    errors = report.errors.len(),
                    "schedule reloaded"
                );
                let _ = reply.send(report);
            }
            Command::ExecuteNow { task, reply } => {
                let accepted = self.accept(task, TriggerKind::Manual).await;
                let _ = reply.send(accepted);
            }
            Command::Cancel { task_id, reply } => {
                let cancelled = self.executor.flights().cancel(task_id);
                if cancelled {
                    tracing::info!(task_id, "cancellation requested");
                } else {
                    tracing::debug!(task_id, "cancel ignored, no active run");
                }
                let _ = reply.send(cancelled);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    /// Take the task's single-flight slot, record the run as pending and
    /// dispatch it.
    async fn accept(&mut self, task: Task, trigger: TriggerKind) -> Result<uuid::Uuid, SluiceError> {
        let task_id = task.id;
        let guard = self
            .executor
            .flights()
            .try_acquire(task_id, trigger, self.clock.now())
            .inspect_err(|e| {
                tracing::warn!(task_id, trigger = %trigger, error = %e, "run rejected");
                self.executor
                    .with_metrics(|m| m.rejected_already_running += 1);
            })?;
        let job = Job::new(task, guard);
        let execution_id = job.record.execution_id;
        self.executor.persist(&job.record).await;
        self.dispatch(job);
        Ok(execution_id)
    }

    async fn fire_due(&mut self, now: DateTime<Utc>) {
        let due = self.table.take_due(now, self.config.misfire_grace());
        if !due.skipped.is_empty() {
            self.executor
                .with_metrics(|m| m.misfires_skipped += due.skipped.len() as u64);
        }
        for task in due.fire {
            tracing::debug!(task_id = task.id, "scheduled fire");
            // A rejected fire is skipped; the entry already moved forward.
            let _ = self.accept(task, TriggerKind::Scheduled).await;
        }
    }

    fn dispatch(&mut self, job: Job) {
        if !self.backlog.is_empty() {
            self.backlog.push_back(job);
            return;
        }
        if let Err(job) = self.pool.try_submit(job) {
            tracing::warn!(
                task_id = job.task.id,
                execution_id = %job.record.execution_id,
                "worker queue full, deferring dispatch"
            );
            self.executor.with_metrics(|m| m.backlog_deferrals += 1);
            self.backlog.push_back(job);
        }
    }

    fn drain_backlog(&mut self) {
        while let Some(job) = self.backlog.pop_front() {
            if let Err(job) = self.pool.try_submit(job) {
                self.backlog.push_front(job);
                break;
            }
        }
    }

    fn status(&self) -> SchedulerStatus {
        let mut metrics = self.executor.metrics();
        metrics.worker_utilization = self.pool.utilization();
        SchedulerStatus {
            scheduler_running: true,
            started_at: self.started_at,
            active_task_count: self.table.len(),
            next_fire_times: self.table.next_fire_times(),
            in_flight: self.executor.flights().snapshot(),
            backlog: self.backlog.len(),
            workers: WorkerStatus {
                size: self.pool.size(),
                busy: self.pool.busy(),
                queue_capacity: self.pool.capacity(),
                queued: self.pool.queued(),
            },
            metrics,
        }
    }

    /// Cancel everything still in flight and wait for workers to finish.
    async fn stop(mut self) {
        let cancelled = self.executor.flights().cancel_all();
        tracing::info!(cancelled, backlog = self.backlog.len(), "scheduler stopping");

        // Backlogged runs close as cancelled so their records are written.
        while let Some(job) = self.backlog.pop_front() {
            self.executor.execute(job).await;
        }
        self.commands.close();
        self.pool.shutdown().await;
        tracing::info!("scheduler stopped");
    }
}
