//! Row types and conversions between SQL rows and domain values.

use chrono::{DateTime, Utc};
use sluice_core::{
    ChannelOutcome, DataSource, DeliveryOptions, ExecutionRecord, ExportMethod, Task, TaskBody,
};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DataSourceRow {
    pub id: i64,
    pub name: String,
    pub url: String,
}

impl From<DataSourceRow> for DataSource {
    fn from(row: DataSourceRow) -> Self {
        DataSource {
            id: row.id,
            name: row.name,
            url: row.url,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub data_source_id: i64,
    pub execution_type: String,
    pub sql_content: Option<String>,
    pub script_path: Option<String>,
    pub script_function: Option<String>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub export_methods: String,
    pub export_filename: Option<String>,
    pub delivery: String,
    pub timeout_secs: Option<i64>,
}

fn corrupt(column: &'static str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        column,
        reason: reason.to_string(),
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let body = match row.execution_type.as_str() {
            "sql" => TaskBody::Sql {
                sql_content: row.sql_content.unwrap_or_default(),
            },
            "script" => TaskBody::Script {
                script_path: row.script_path.unwrap_or_default(),
                script_function: row.script_function.unwrap_or_default(),
            },
            other => return Err(corrupt("execution_type", format!("unknown type '{other}'"))),
        };
        let export_methods: Vec<ExportMethod> =
            serde_json::from_str(&row.export_methods).map_err(|e| corrupt("export_methods", e))?;
        let delivery: DeliveryOptions =
            serde_json::from_str(&row.delivery).map_err(|e| corrupt("delivery", e))?;

        Ok(Task {
            id: row.id,
            name: row.name,
            description: row.description,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            data_source_id: row.data_source_id,
            body,
            cron_expression: row.cron_expression,
            timezone: row.timezone,
            export_methods,
            export_filename: row.export_filename,
            delivery,
            timeout_secs: row.timeout_secs.and_then(|s| u64::try_from(s).ok()),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ExecutionRow {
    pub execution_id: String,
    pub task_id: i64,
    pub status: String,
    pub trigger_kind: String,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub rows_affected: i64,
    pub error_message: Option<String>,
    pub output_file_path: Option<String>,
    pub file_size: Option<i64>,
    pub delivery_results: String,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let delivery_results: Vec<ChannelOutcome> = serde_json::from_str(&row.delivery_results)
            .map_err(|e| corrupt("delivery_results", e))?;
        Ok(ExecutionRecord {
            execution_id: Uuid::parse_str(&row.execution_id)
                .map_err(|e| corrupt("execution_id", e))?,
            task_id: row.task_id,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            trigger: row.trigger_kind.parse().map_err(|e| corrupt("trigger_kind", e))?,
            created_at: row.created_at,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_secs: row.duration_secs,
            rows_affected: u64::try_from(row.rows_affected).unwrap_or(0),
            error_message: row.error_message,
            output_file_path: row.output_file_path,
            file_size: row.file_size.and_then(|s| u64::try_from(s).ok()),
            delivery_results,
        })
    }
}

/// Split a task body into its nullable columns.
pub(crate) fn body_columns(body: &TaskBody) -> (Option<&str>, Option<&str>, Option<&str>) {
    match body {
        TaskBody::Sql { sql_content } => (Some(sql_content.as_str()), None, None),
        TaskBody::Script {
            script_path,
            script_function,
        } => (None, Some(script_path.as_str()), Some(script_function.as_str())),
    }
}
