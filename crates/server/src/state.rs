use std::path::PathBuf;
use std::sync::Arc;

use sluice_core::{DataSourceRegistry, TaskRepository};
use sluice_scheduler::SchedulerHandle;

pub struct AppState {
    pub scheduler: SchedulerHandle,
    /// Execution history reads.
    pub repository: Arc<dyn TaskRepository>,
    /// Connectivity checks for data sources.
    pub registry: Arc<dyn DataSourceRegistry>,
    /// Directory served under `/api/files/download`.
    pub export_dir: PathBuf,
}
