use std::str::FromStr;

use chrono::Utc;
use sluice_core::{
    DataSource, DataSourceCatalog, DataSourceId, DeliveryOptions, ExecutionRecord, ExportMethod,
    SluiceError, Task, TaskBody, TaskId, TaskRepository, TaskStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::error::StoreError;
use crate::rows::{body_columns, DataSourceRow, ExecutionRow, TaskRow};

const TASK_COLUMNS: &str = "id, name, description, status, data_source_id, execution_type, \
    sql_content, script_path, script_function, cron_expression, timezone, export_methods, \
    export_filename, delivery, timeout_secs";

const EXECUTION_COLUMNS: &str = "execution_id, task_id, status, trigger_kind, created_at, \
    start_time, end_time, duration_secs, rows_affected, error_message, output_file_path, \
    file_size, delivery_results";

/// A task definition before it has an id.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub data_source_id: DataSourceId,
    #[serde(flatten)]
    pub body: TaskBody,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub export_methods: Vec<ExportMethod>,
    #[serde(default)]
    pub export_filename: Option<String>,
    #[serde(default)]
    pub delivery: DeliveryOptions,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl NewTask {
    fn into_task(self, id: TaskId) -> Task {
        Task {
            id,
            name: self.name,
            description: self.description,
            status: self.status,
            data_source_id: self.data_source_id,
            body: self.body,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            export_methods: self.export_methods,
            export_filename: self.export_filename,
            delivery: self.delivery,
            timeout_secs: self.timeout_secs,
        }
    }
}

fn to_json<T: serde::Serialize>(column: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        column,
        reason: e.to_string(),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    /// Single-connection in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    // ── Data sources ──────────────────────────────────────────

    /// Register a data source; used to seed a fresh database.
    pub async fn create_data_source(&self, name: &str, url: &str) -> Result<DataSource, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO data_sources (name, url, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(url)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(DataSource {
            id,
            name: name.to_string(),
            url: url.to_string(),
        })
    }

    // ── Tasks ─────────────────────────────────────────────────

    /// Insert a task definition; used to seed a fresh database.
    pub async fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        let (sql_content, script_path, script_function) = body_columns(&new.body);
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO tasks (name, description, status, data_source_id, execution_type, \
             sql_content, script_path, script_function, cron_expression, timezone, \
             export_methods, export_filename, delivery, timeout_secs, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.status.as_str())
        .bind(new.data_source_id)
        .bind(new.body.execution_type())
        .bind(sql_content)
        .bind(script_path)
        .bind(script_function)
        .bind(&new.cron_expression)
        .bind(&new.timezone)
        .bind(to_json("export_methods", &new.export_methods)?)
        .bind(&new.export_filename)
        .bind(to_json("delivery", &new.delivery)?)
        .bind(new.timeout_secs.map(to_i64))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(task_id = id, name = %new.name, "task created");
        Ok(new.into_task(id))
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqliteStore {
    async fn list_active_scheduled_tasks(&self) -> Result<Vec<Task>, SluiceError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = 'active' AND cron_expression IS NOT NULL \
             AND TRIM(cron_expression) <> '' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match Task::try_from(row) {
                Ok(task) => tasks.push(task),
                // One unreadable row must not hide every other schedule.
                Err(e) => tracing::error!(task_id = id, error = %e, "skipping unreadable task row"),
            }
        }
        Ok(tasks)
    }

    async fn get(&self, task_id: TaskId) -> Result<Task, SluiceError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .ok_or(SluiceError::TaskNotFound(task_id))?;
        Ok(Task::try_from(row)?)
    }

    async fn save_execution_record(&self, record: &ExecutionRecord) -> Result<(), SluiceError> {
        let result = sqlx::query(
            "INSERT INTO execution_logs (execution_id, task_id, status, trigger_kind, created_at, \
             start_time, end_time, duration_secs, rows_affected, error_message, output_file_path, \
             file_size, delivery_results) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(execution_id) DO UPDATE SET \
               status = excluded.status, start_time = excluded.start_time, \
               end_time = excluded.end_time, duration_secs = excluded.duration_secs, \
               rows_affected = excluded.rows_affected, error_message = excluded.error_message, \
               output_file_path = excluded.output_file_path, file_size = excluded.file_size, \
               delivery_results = excluded.delivery_results \
             WHERE execution_logs.status IN ('pending', 'running')",
        )
        .bind(record.execution_id.to_string())
        .bind(record.task_id)
        .bind(record.status.as_str())
        .bind(record.trigger.as_str())
        .bind(record.created_at)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.duration_secs)
        .bind(to_i64(record.rows_affected))
        .bind(&record.error_message)
        .bind(&record.output_file_path)
        .bind(record.file_size.map(to_i64))
        .bind(to_json("delivery_results", &record.delivery_results)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                execution_id = %record.execution_id,
                status = %record.status,
                "execution record already closed; update ignored"
            );
        }
        Ok(())
    }

    async fn list_execution_records(
        &self,
        task_id: TaskId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, SluiceError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM execution_logs WHERE task_id = ? \
             ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(task_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(rows
            .into_iter()
            .map(ExecutionRecord::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn get_execution_record(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, SluiceError> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM execution_logs WHERE execution_id = ?"
        ))
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.map(ExecutionRecord::try_from).transpose()?)
    }
}

#[async_trait::async_trait]
impl DataSourceCatalog for SqliteStore {
    async fn data_source(&self, id: DataSourceId) -> Result<DataSource, SluiceError> {
        let row = sqlx::query_as::<_, DataSourceRow>(
            "SELECT id, name, url FROM data_sources WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .ok_or(SluiceError::DataSourceNotFound(id))?;
        Ok(row.into())
    }
}
