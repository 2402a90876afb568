//! Notifier trait definition and shared error types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sluice_core::{DeliveryOptions, ExportArtifact, ExportMethod, SluiceError, TaskId};
use uuid::Uuid;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Attachment could not be read: {0}")]
    Attachment(#[from] std::io::Error),

    #[error("Rejected by remote: {0}")]
    Rejected(String),
}

impl NotifyError {
    pub fn into_sluice(self, channel: &str) -> SluiceError {
        SluiceError::Notifier {
            channel: channel.to_string(),
            message: self.to_string(),
        }
    }
}

/// Task metadata describing the run being delivered.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub task_id: TaskId,
    pub task_name: String,
    pub execution_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub rows: u64,
    pub duration_secs: f64,
}

/// Trait for delivery channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a finished export through this channel.
    async fn send(
        &self,
        artifact: &ExportArtifact,
        summary: &RunSummary,
        options: &DeliveryOptions,
    ) -> Result<(), NotifyError>;

    /// Report a failed run through this channel.
    async fn send_failure(
        &self,
        summary: &RunSummary,
        error: &str,
        options: &DeliveryOptions,
    ) -> Result<(), NotifyError>;

    /// Which export method this channel serves.
    fn method(&self) -> ExportMethod;

    /// Upper bound this channel needs for one send, retries included.
    fn timeout(&self) -> Duration;

    /// Human-readable name for this channel (e.g., "chat", "email").
    fn channel_name(&self) -> &str {
        self.method().as_str()
    }
}
