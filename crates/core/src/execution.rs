//! Execution records: one per run attempt.
//!
//! A record moves `pending -> running -> {success, failed, cancelled}`; a
//! pending run may also be cancelled before it starts. Once terminal the
//! record is closed and every further transition is rejected.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SluiceError;
use crate::result::ExportArtifact;
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(SluiceError::Store(format!("unknown execution status '{other}'"))),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
    Test,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            "test" => Ok(Self::Test),
            other => Err(SluiceError::Store(format!("unknown trigger kind '{other}'"))),
        }
    }
}

/// Outcome of one delivery channel for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub trigger: TriggerKind,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Monotonic seconds between running-start and the terminal state.
    pub duration_secs: Option<f64>,
    pub rows_affected: u64,
    pub error_message: Option<String>,
    pub output_file_path: Option<String>,
    pub file_size: Option<u64>,
    #[serde(default)]
    pub delivery_results: Vec<ChannelOutcome>,
}

impl ExecutionRecord {
    pub fn pending(
        execution_id: Uuid,
        task_id: TaskId,
        trigger: TriggerKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            task_id,
            status: ExecutionStatus::Pending,
            trigger,
            created_at: now,
            start_time: None,
            end_time: None,
            duration_secs: None,
            rows_affected: 0,
            error_message: None,
            output_file_path: None,
            file_size: None,
            delivery_results: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), SluiceError> {
        if self.status != ExecutionStatus::Pending {
            return Err(SluiceError::RecordClosed(self.execution_id));
        }
        self.status = ExecutionStatus::Running;
        self.start_time = Some(now);
        Ok(())
    }

    pub fn succeed(
        &mut self,
        rows_affected: u64,
        artifact: Option<&ExportArtifact>,
        delivery_results: Vec<ChannelOutcome>,
        now: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<(), SluiceError> {
        self.close(ExecutionStatus::Success, now, elapsed)?;
        self.rows_affected = rows_affected;
        if let Some(artifact) = artifact {
            self.output_file_path = Some(artifact.path.display().to_string());
            self.file_size = Some(artifact.size);
        }
        self.delivery_results = delivery_results;
        Ok(())
    }

    pub fn fail(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<(), SluiceError> {
        self.close(ExecutionStatus::Failed, now, elapsed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn cancel(
        &mut self,
        message: Option<String>,
        now: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<(), SluiceError> {
        self.close(ExecutionStatus::Cancelled, now, elapsed)?;
        self.error_message = message;
        Ok(())
    }

    fn close(
        &mut self,
        status: ExecutionStatus,
        now: DateTime<Utc>,
        elapsed: Duration,
    ) -> Result<(), SluiceError> {
        if self.is_terminal() {
            return Err(SluiceError::RecordClosed(self.execution_id));
        }
        // Only a pending run may be closed without having started, and only by cancellation.
        if self.status == ExecutionStatus::Pending && status != ExecutionStatus::Cancelled {
            return Err(SluiceError::RecordClosed(self.execution_id));
        }
        self.status = status;
        self.end_time = Some(now);
        self.duration_secs = Some(if self.start_time.is_some() {
            elapsed.as_secs_f64()
        } else {
            0.0
        });
        Ok(())
    }
}
