//! Collaborator contracts consumed by the scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SluiceError;
use crate::execution::ExecutionRecord;
use crate::result::ResultSet;
use crate::task::{DataSourceId, Task, TaskId};

/// Durable task definitions and execution history.
#[async_trait::async_trait]
pub trait TaskRepository: Send + Sync {
    /// Active tasks with a non-empty cron expression.
    async fn list_active_scheduled_tasks(&self) -> Result<Vec<Task>, SluiceError>;

    /// Fails with [`SluiceError::TaskNotFound`] for unknown ids.
    async fn get(&self, task_id: TaskId) -> Result<Task, SluiceError>;

    /// Upsert by execution id. A record that is already terminal in storage
    /// is left untouched.
    async fn save_execution_record(&self, record: &ExecutionRecord) -> Result<(), SluiceError>;

    /// Newest first.
    async fn list_execution_records(
        &self,
        task_id: TaskId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, SluiceError>;

    async fn get_execution_record(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, SluiceError>;
}

/// Connection info for a registered data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DataSourceId,
    pub name: String,
    /// Driver URL, e.g. `postgres://...`, `mysql://...`, `sqlite://...`.
    pub url: String,
}

#[async_trait::async_trait]
pub trait DataSourceCatalog: Send + Sync {
    /// Fails with [`SluiceError::DataSourceNotFound`] for unknown ids.
    async fn data_source(&self, id: DataSourceId) -> Result<DataSource, SluiceError>;
}

/// Context handed to script tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptContext {
    pub task_id: TaskId,
    pub task_name: String,
    pub execution_id: Option<Uuid>,
    /// Row cap requested by a preview; `None` for real runs.
    pub row_limit: Option<usize>,
}

/// Query and script execution against registered data sources.
///
/// Both calls fail with [`SluiceError::DataSourceUnavailable`] when no
/// connection can be established.
#[async_trait::async_trait]
pub trait DataSourceRegistry: Send + Sync {
    async fn execute_query(
        &self,
        data_source_id: DataSourceId,
        sql: &str,
        timeout: Duration,
    ) -> Result<ResultSet, SluiceError>;

    async fn run_script(
        &self,
        data_source_id: DataSourceId,
        script_path: &str,
        function_name: &str,
        context: &ScriptContext,
        timeout: Duration,
    ) -> Result<ResultSet, SluiceError>;

    async fn test_connection(&self, data_source_id: DataSourceId) -> Result<(), SluiceError>;
}
