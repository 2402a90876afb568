use std::time::Duration;

use sluice_core::SluiceError;
use sluice_scheduler::SchedulerHandle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Reload the schedule every `interval` so edits made by other processes are
/// picked up. Stops once the scheduler is gone.
pub(crate) fn spawn_periodic_reload(handle: SchedulerHandle, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "periodic reload enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; startup already reloaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match handle.reload_schedule().await {
                Ok(report) => {
                    if !report.added.is_empty() || !report.removed.is_empty() || !report.rescheduled.is_empty() {
                        info!(
                            added = report.added.len(),
                            removed = report.removed.len(),
                            rescheduled = report.rescheduled.len(),
                            "periodic reload changed the schedule"
                        );
                    }
                }
                Err(SluiceError::SchedulerUnavailable) => break,
                Err(e) => warn!(error = %e, "periodic reload failed"),
            }
        }
    })
}
