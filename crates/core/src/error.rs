use thiserror::Error;
use uuid::Uuid;

use crate::task::{DataSourceId, TaskId};

#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(DataSourceId),

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("Script execution failed: {0}")]
    ScriptExecution(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Execution timed out after {secs}s")]
    TimeoutExceeded { secs: u64 },

    #[error("Notifier '{channel}' failed: {message}")]
    Notifier { channel: String, message: String },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution record {0} is already closed")]
    RecordClosed(Uuid),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Scheduler is not running")]
    SchedulerUnavailable,

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SluiceError {
    /// Whether the error belongs to a single run and ends up in its record
    /// rather than being raised to the caller.
    pub fn is_run_local(&self) -> bool {
        matches!(
            self,
            Self::DataSourceUnavailable(_)
                | Self::DataSourceNotFound(_)
                | Self::QueryExecution(_)
                | Self::ScriptExecution(_)
                | Self::Export(_)
                | Self::TimeoutExceeded { .. }
                | Self::Notifier { .. }
        )
    }
}
