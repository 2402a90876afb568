//! In-memory collaborators shared by the unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono_tz::Tz;
use serde_json::json;
use sluice_core::config::ExecutionConfig;
use sluice_core::{
    DataSourceId, DataSourceRegistry, DeliveryOptions, ExecutionRecord, ExecutionStatus,
    ExportArtifact, ExportMethod, ResultSet, ScriptContext, SluiceError, Task, TaskBody, TaskId,
    TaskRepository, TaskStatus,
};
use sluice_notify::{Notifier, NotifyError, RunSummary};
use uuid::Uuid;

use crate::delivery::DeliveryCoordinator;
use crate::executor::TaskExecutor;
use crate::export::{ExportFormat, FileExporter};

pub(crate) fn task(id: TaskId, cron: Option<&str>) -> Task {
    Task {
        id,
        name: format!("task-{id}"),
        description: None,
        status: TaskStatus::Active,
        data_source_id: 1,
        body: TaskBody::Sql {
            sql_content: "SELECT id, total FROM orders".to_string(),
        },
        cron_expression: cron.map(str::to_string),
        timezone: None,
        export_methods: vec![ExportMethod::Local],
        export_filename: Some(format!("task{id}_{{datetime}}")),
        delivery: DeliveryOptions::default(),
        timeout_secs: None,
    }
}

pub(crate) fn rows(n: usize) -> ResultSet {
    ResultSet::new(
        vec!["id".to_string(), "total".to_string()],
        (0..n).map(|i| vec![json!(i), json!(i as f64 * 1.5)]).collect(),
    )
}

#[derive(Clone)]
pub(crate) enum Behavior {
    Rows(ResultSet),
    Fail(String),
    Unavailable,
}

/// Registry that answers every call with a fixed behavior after `delay`.
pub(crate) struct MockRegistry {
    behavior: Behavior,
    delay: Duration,
    pub(crate) queries: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub(crate) fn new(behavior: Behavior, delay: Duration) -> Self {
        Self {
            behavior,
            delay,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn rows(n: usize) -> Self {
        Self::new(Behavior::Rows(rows(n)), Duration::ZERO)
    }

    pub(crate) fn slow(n: usize, delay: Duration) -> Self {
        Self::new(Behavior::Rows(rows(n)), delay)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    async fn answer(&self) -> Result<ResultSet, SluiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            Behavior::Rows(r) => Ok(r.clone()),
            Behavior::Fail(msg) => Err(SluiceError::QueryExecution(msg.clone())),
            Behavior::Unavailable => Err(SluiceError::DataSourceUnavailable(
                "connection refused".to_string(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl DataSourceRegistry for MockRegistry {
    async fn execute_query(
        &self,
        _data_source_id: DataSourceId,
        sql: &str,
        _timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        self.queries.lock().unwrap().push(sql.to_string());
        self.answer().await
    }

    async fn run_script(
        &self,
        _data_source_id: DataSourceId,
        script_path: &str,
        function_name: &str,
        context: &ScriptContext,
        _timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        self.queries.lock().unwrap().push(format!(
            "{script_path}:{function_name}:{:?}",
            context.row_limit
        ));
        self.answer().await
    }

    async fn test_connection(&self, _data_source_id: DataSourceId) -> Result<(), SluiceError> {
        match self.behavior {
            Behavior::Unavailable => Err(SluiceError::DataSourceUnavailable(
                "connection refused".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Repository backed by maps; terminal records are never overwritten.
#[derive(Default)]
pub(crate) struct MemoryRepository {
    tasks: Mutex<HashMap<TaskId, Task>>,
    records: Mutex<HashMap<Uuid, ExecutionRecord>>,
    /// Every accepted save, in order.
    saves: Mutex<Vec<(Uuid, ExecutionStatus)>>,
}

impl MemoryRepository {
    pub(crate) fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::default();
        for task in tasks {
            repo.put(task);
        }
        repo
    }

    pub(crate) fn put(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    pub(crate) fn remove(&self, task_id: TaskId) {
        self.tasks.lock().unwrap().remove(&task_id);
    }

    pub(crate) fn saves(&self) -> Vec<(Uuid, ExecutionStatus)> {
        self.saves.lock().unwrap().clone()
    }

    pub(crate) fn records_for(&self, task_id: TaskId) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl TaskRepository for MemoryRepository {
    async fn list_active_scheduled_tasks(&self) -> Result<Vec<Task>, SluiceError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.is_schedulable())
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn get(&self, task_id: TaskId) -> Result<Task, SluiceError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&task_id)
            .cloned()
            .ok_or(SluiceError::TaskNotFound(task_id))
    }

    async fn save_execution_record(&self, record: &ExecutionRecord) -> Result<(), SluiceError> {
        let mut records = self.records.lock().unwrap();
        if records
            .get(&record.execution_id)
            .is_some_and(|r| r.is_terminal())
        {
            return Ok(());
        }
        records.insert(record.execution_id, record.clone());
        self.saves
            .lock()
            .unwrap()
            .push((record.execution_id, record.status));
        Ok(())
    }

    async fn list_execution_records(
        &self,
        task_id: TaskId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, SluiceError> {
        let mut records = self.records_for(task_id);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn get_execution_record(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, SluiceError> {
        Ok(self.records.lock().unwrap().get(&execution_id).cloned())
    }
}

/// Notifier that always succeeds or always fails.
pub(crate) struct StubNotifier {
    method: ExportMethod,
    fails: bool,
}

impl StubNotifier {
    pub(crate) fn ok(method: ExportMethod) -> Arc<dyn Notifier> {
        Arc::new(Self {
            method,
            fails: false,
        })
    }

    pub(crate) fn failing(method: ExportMethod) -> Arc<dyn Notifier> {
        Arc::new(Self {
            method,
            fails: true,
        })
    }

    fn outcome(&self) -> Result<(), NotifyError> {
        if self.fails {
            Err(NotifyError::Smtp("535 authentication failed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl Notifier for StubNotifier {
    async fn send(
        &self,
        _artifact: &ExportArtifact,
        _summary: &RunSummary,
        _options: &DeliveryOptions,
    ) -> Result<(), NotifyError> {
        self.outcome()
    }

    async fn send_failure(
        &self,
        _summary: &RunSummary,
        _error: &str,
        _options: &DeliveryOptions,
    ) -> Result<(), NotifyError> {
        self.outcome()
    }

    fn method(&self) -> ExportMethod {
        self.method
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Executor writing CSV files into `dir`, with no notifier channels configured.
pub(crate) fn executor(
    registry: Arc<MockRegistry>,
    repository: Arc<MemoryRepository>,
    dir: &Path,
) -> TaskExecutor {
    executor_with(registry, repository, dir, Vec::new())
}

/// Executor writing CSV files into `dir` and delivering through `notifiers`.
pub(crate) fn executor_with(
    registry: Arc<dyn DataSourceRegistry>,
    repository: Arc<dyn TaskRepository>,
    dir: &Path,
    notifiers: Vec<Arc<dyn Notifier>>,
) -> TaskExecutor {
    let exporter = Arc::new(FileExporter::new(dir, ExportFormat::Csv));
    let delivery = DeliveryCoordinator::new(exporter, notifiers, Duration::from_secs(5));
    TaskExecutor::new(
        registry,
        repository,
        delivery,
        ExecutionConfig::default(),
        Tz::UTC,
    )
}

/// Poll `check` every 10ms for up to `within`.
pub(crate) async fn wait_until(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
