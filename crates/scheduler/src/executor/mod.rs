//! Task executor: runs one task to a terminal execution record.
//!
//! Split into focused submodules:
//! - `preview`: capped `test` runs with no record and no delivery

mod preview;

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Tz;
use sluice_core::config::ExecutionConfig;
use sluice_core::{
    DataSourceRegistry, ExecutionRecord, ExecutionStatus, ResultSet, ScriptContext, SluiceError,
    Task, TaskBody, TaskRepository, TriggerKind,
};
use sluice_notify::RunSummary;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::parse_timezone;
use crate::delivery::{DeliveryCoordinator, DeliveryReport};
use crate::export::ExportContext;
use crate::flight::{FlightGuard, FlightTable};
use crate::metrics::SchedulerMetrics;

pub use self::preview::TestPreview;

/// An accepted run: the task, its pending record, and the slot it holds.
#[derive(Debug)]
pub struct Job {
    pub task: Task,
    pub record: ExecutionRecord,
    pub guard: FlightGuard,
}

impl Job {
    pub fn new(task: Task, guard: FlightGuard) -> Self {
        let record =
            ExecutionRecord::pending(guard.execution_id(), task.id, guard.trigger(), Utc::now());
        Self {
            task,
            record,
            guard,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(ExecutionRecord),
    Preview(TestPreview),
}

/// How a run ended, before it is written to the record.
enum Ending {
    Success {
        rows: u64,
        report: DeliveryReport,
    },
    Failed(SluiceError),
    Cancelled(&'static str),
}

pub struct TaskExecutor {
    registry: Arc<dyn DataSourceRegistry>,
    repository: Arc<dyn TaskRepository>,
    delivery: DeliveryCoordinator,
    settings: ExecutionConfig,
    default_timezone: Tz,
    flights: Arc<FlightTable>,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<dyn DataSourceRegistry>,
        repository: Arc<dyn TaskRepository>,
        delivery: DeliveryCoordinator,
        settings: ExecutionConfig,
        default_timezone: Tz,
    ) -> Self {
        Self {
            registry,
            repository,
            delivery,
            settings,
            default_timezone,
            flights: Arc::new(FlightTable::new()),
            metrics: Arc::new(RwLock::new(SchedulerMetrics::default())),
        }
    }

    pub fn flights(&self) -> &Arc<FlightTable> {
        &self.flights
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    pub fn registry(&self) -> &Arc<dyn DataSourceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutionConfig {
        &self.settings
    }

    pub fn default_timezone(&self) -> Tz {
        self.default_timezone
    }

    /// Snapshot of the current metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn with_metrics<R>(&self, f: impl FnOnce(&mut SchedulerMetrics) -> R) -> R {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        f(&mut metrics)
    }

    /// Run `task` to completion on the caller's task.
    ///
    /// `Scheduled` and `Manual` runs take the single-flight slot and fail fast
    /// with [`SluiceError::AlreadyRunning`]; `Test` runs return a preview.
    pub async fn run(&self, task: Task, trigger: TriggerKind) -> Result<RunOutcome, SluiceError> {
        if trigger == TriggerKind::Test {
            let preview = self.preview(&task, self.settings.test_row_limit).await;
            return Ok(RunOutcome::Preview(preview));
        }
        let guard = self.flights.try_acquire(task.id, trigger, Utc::now())?;
        Ok(RunOutcome::Completed(self.execute(Job::new(task, guard)).await))
    }

    /// Drive an accepted job to a terminal, persisted record.
    pub async fn execute(&self, job: Job) -> ExecutionRecord {
        let Job {
            task,
            mut record,
            guard,
        } = job;
        let token = guard.token().clone();

        if token.is_cancelled() {
            guard.mark_finishing();
            self.finish(&task, &mut record, Ending::Cancelled("cancelled before start"), Duration::ZERO);
            self.persist(&record).await;
            drop(guard);
            return record;
        }

        let timeout = self.settings.timeout_for(&task);
        let started = Instant::now();
        guard.mark_running();
        if let Err(e) = record.mark_running(Utc::now()) {
            tracing::error!(execution_id = %record.execution_id, error = %e, "record was not pending");
        }
        self.persist(&record).await;

        tracing::info!(
            task_id = task.id,
            execution_id = %record.execution_id,
            trigger = %record.trigger,
            timeout_secs = timeout.as_secs(),
            "execution started"
        );

        let ending = self.run_body(&task, &record, &token, timeout, started).await;
        guard.mark_finishing();
        let failure = match &ending {
            Ending::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        self.finish(&task, &mut record, ending, started.elapsed());
        self.persist(&record).await;
        drop(guard);

        if let Some(error) = failure {
            let summary = self.summary(&task, &record, record.rows_affected, started.elapsed());
            self.delivery.notify_failure(&task, &summary, &error).await;
        }
        record
    }

    async fn run_body(
        &self,
        task: &Task,
        record: &ExecutionRecord,
        token: &CancellationToken,
        timeout: Duration,
        started: Instant,
    ) -> Ending {
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return Ending::Cancelled("cancelled while running"),
            r = tokio::time::timeout(timeout, self.fetch(task, Some(record.execution_id), None, timeout)) => r,
        };
        let result = match fetched {
            Err(_) => {
                return Ending::Failed(SluiceError::TimeoutExceeded {
                    secs: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return Ending::Failed(e),
            Ok(Ok(result)) => result,
        };

        if token.is_cancelled() {
            return Ending::Cancelled("cancelled before delivery");
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Ending::Failed(SluiceError::TimeoutExceeded {
                secs: timeout.as_secs(),
            });
        }

        let rows = result.row_count();
        let summary = self.summary(task, record, rows, started.elapsed());
        let context = ExportContext {
            task_name: task.name.clone(),
            executed_at: Utc::now().with_timezone(&self.timezone_for(task)),
        };
        match self
            .delivery
            .deliver(task, &result, &summary, &context, remaining)
            .await
        {
            Ok(report) => Ending::Success { rows, report },
            Err(e) => Ending::Failed(e),
        }
    }

    /// Fetch rows for `task`, honoring a preview row cap when given.
    async fn fetch(
        &self,
        task: &Task,
        execution_id: Option<Uuid>,
        row_limit: Option<usize>,
        timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        match &task.body {
            TaskBody::Sql { sql_content } => {
                let sql = match row_limit {
                    Some(limit) => preview::limit_sql(sql_content, limit),
                    None => sql_content.clone(),
                };
                self.registry
                    .execute_query(task.data_source_id, &sql, timeout)
                    .await
            }
            TaskBody::Script {
                script_path,
                script_function,
            } => {
                let context = ScriptContext {
                    task_id: task.id,
                    task_name: task.name.clone(),
                    execution_id,
                    row_limit,
                };
                self.registry
                    .run_script(
                        task.data_source_id,
                        script_path,
                        script_function,
                        &context,
                        timeout,
                    )
                    .await
            }
        }
    }

    fn finish(&self, task: &Task, record: &mut ExecutionRecord, ending: Ending, elapsed: Duration) {
        let now = Utc::now();
        let closed = match ending {
            Ending::Success { rows, report } => {
                record.succeed(rows, Some(&report.artifact), report.channels, now, elapsed)
            }
            Ending::Failed(e) => record.fail(e.to_string(), now, elapsed),
            Ending::Cancelled(reason) => record.cancel(Some(reason.to_string()), now, elapsed),
        };
        if let Err(e) = closed {
            tracing::error!(execution_id = %record.execution_id, error = %e, "could not close record");
            return;
        }

        self.with_metrics(|m| m.record_execution(task.id, record.status, elapsed));

        match record.status {
            ExecutionStatus::Success => tracing::info!(
                task_id = task.id,
                execution_id = %record.execution_id,
                rows = record.rows_affected,
                duration_secs = record.duration_secs.unwrap_or_default(),
                "execution succeeded"
            ),
            ExecutionStatus::Cancelled => tracing::info!(
                task_id = task.id,
                execution_id = %record.execution_id,
                reason = record.error_message.as_deref().unwrap_or_default(),
                "execution cancelled"
            ),
            _ => tracing::warn!(
                task_id = task.id,
                execution_id = %record.execution_id,
                error = record.error_message.as_deref().unwrap_or_default(),
                "execution failed"
            ),
        }
    }

    /// Write the record; storage errors are logged, never raised to the run.
    pub(crate) async fn persist(&self, record: &ExecutionRecord) {
        if let Err(e) = self.repository.save_execution_record(record).await {
            tracing::error!(
                execution_id = %record.execution_id,
                status = %record.status,
                error = %e,
                "failed to persist execution record"
            );
        }
    }

    fn summary(&self, task: &Task, record: &ExecutionRecord, rows: u64, elapsed: Duration) -> RunSummary {
        RunSummary {
            task_id: task.id,
            task_name: task.name.clone(),
            execution_id: record.execution_id,
            executed_at: record.start_time.unwrap_or(record.created_at),
            rows,
            duration_secs: elapsed.as_secs_f64(),
        }
    }

    fn timezone_for(&self, task: &Task) -> Tz {
        match task.timezone.as_deref().filter(|t| !t.trim().is_empty()) {
            None => self.default_timezone,
            Some(name) => parse_timezone(name).unwrap_or_else(|e| {
                tracing::warn!(task_id = task.id, error = %e, "falling back to default timezone");
                self.default_timezone
            }),
        }
    }
}
