//! Export once, then deliver to each requested channel.
//!
//! Channels run in a fixed order (email, then chat). A channel failure is
//! recorded in its own outcome and never stops the remaining channels or
//! changes the run's status. Only a failed export fails the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sluice_core::{ChannelOutcome, ExportArtifact, ExportMethod, ResultSet, SluiceError, Task};
use sluice_notify::{Notifier, RunSummary};

use crate::export::{ExportContext, Exporter};

/// Order in which notifier channels are attempted.
const CHANNEL_ORDER: [ExportMethod; 2] = [ExportMethod::Email, ExportMethod::Chat];

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub artifact: ExportArtifact,
    pub channels: Vec<ChannelOutcome>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.channels.iter().all(|c| c.success)
    }
}

pub struct DeliveryCoordinator {
    exporter: Arc<dyn Exporter>,
    notifiers: Vec<Arc<dyn Notifier>>,
    /// Hard cap on any single channel send.
    notifier_cap: Duration,
}

impl DeliveryCoordinator {
    pub fn new(
        exporter: Arc<dyn Exporter>,
        notifiers: Vec<Arc<dyn Notifier>>,
        notifier_cap: Duration,
    ) -> Self {
        Self {
            exporter,
            notifiers,
            notifier_cap,
        }
    }

    fn notifier_for(&self, method: ExportMethod) -> Option<&Arc<dyn Notifier>> {
        self.notifiers.iter().find(|n| n.method() == method)
    }

    fn channel_budget(&self, notifier: &dyn Notifier) -> Duration {
        notifier.timeout().min(self.notifier_cap)
    }

    /// Render the export within `export_budget`, then attempt each channel.
    pub async fn deliver(
        &self,
        task: &Task,
        result: &ResultSet,
        summary: &RunSummary,
        context: &ExportContext,
        export_budget: Duration,
    ) -> Result<DeliveryReport, SluiceError> {
        let artifact = tokio::time::timeout(
            export_budget,
            self.exporter
                .export(result, task.export_filename.as_deref(), context),
        )
        .await
        .map_err(|_| SluiceError::TimeoutExceeded {
            secs: export_budget.as_secs(),
        })?
        .map_err(|e| match e {
            SluiceError::Export(_) => e,
            other => SluiceError::Export(other.to_string()),
        })?;

        let mut channels = Vec::new();
        if task.wants(ExportMethod::Local) {
            channels.push(ChannelOutcome {
                channel: ExportMethod::Local.to_string(),
                success: true,
                error: None,
                duration_ms: 0,
            });
        }

        for method in CHANNEL_ORDER {
            if !task.wants(method) {
                continue;
            }
            channels.push(self.send_one(method, task, &artifact, summary).await);
        }

        Ok(DeliveryReport { artifact, channels })
    }

    async fn send_one(
        &self,
        method: ExportMethod,
        task: &Task,
        artifact: &ExportArtifact,
        summary: &RunSummary,
    ) -> ChannelOutcome {
        let started = Instant::now();
        let result = match self.notifier_for(method) {
            None => Err(format!("{method} channel is not configured")),
            Some(notifier) => {
                let budget = self.channel_budget(notifier.as_ref());
                match tokio::time::timeout(budget, notifier.send(artifact, summary, &task.delivery))
                    .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into_sluice(notifier.channel_name()).to_string()),
                    Err(_) => Err(format!(
                        "{method} channel timed out after {}s",
                        budget.as_secs()
                    )),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(
                    task_id = task.id,
                    execution_id = %summary.execution_id,
                    channel = %method,
                    duration_ms,
                    "delivery succeeded"
                );
                ChannelOutcome {
                    channel: method.to_string(),
                    success: true,
                    error: None,
                    duration_ms,
                }
            }
            Err(error) => {
                tracing::warn!(
                    task_id = task.id,
                    execution_id = %summary.execution_id,
                    channel = %method,
                    duration_ms,
                    error = %error,
                    "delivery failed"
                );
                ChannelOutcome {
                    channel: method.to_string(),
                    success: false,
                    error: Some(error),
                    duration_ms,
                }
            }
        }
    }

    /// Tell each requested channel that the run failed. Best-effort: outcomes
    /// are logged and never touch the execution record.
    pub async fn notify_failure(&self, task: &Task, summary: &RunSummary, error: &str) {
        for method in CHANNEL_ORDER {
            if !task.wants(method) {
                continue;
            }
            let Some(notifier) = self.notifier_for(method) else {
                continue;
            };
            let budget = self.channel_budget(notifier.as_ref());
            match tokio::time::timeout(
                budget,
                notifier.send_failure(summary, error, &task.delivery),
            )
            .await
            {
                Ok(Ok(())) => {
                    tracing::info!(task_id = task.id, channel = %method, "failure notice sent")
                }
                Ok(Err(e)) => {
                    tracing::warn!(task_id = task.id, channel = %method, error = %e, "failure notice not sent")
                }
                Err(_) => {
                    tracing::warn!(task_id = task.id, channel = %method, "failure notice timed out")
                }
            }
        }
    }
}
