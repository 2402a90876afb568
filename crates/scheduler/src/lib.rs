//! Scheduling and execution of export tasks.
//!
//! - `clock`: cron + timezone evaluation (`next_fire_after`)
//! - `flight`: per-task single-flight table with cooperative cancellation
//! - `executor`: runs one task to a terminal execution record, or a preview
//! - `delivery`: export once, then fan out to notifier channels
//! - `export`: file rendering and filename templates
//! - `pool`: bounded worker pool
//! - `runner`: the coordinator that owns the live schedule, and its handle

pub mod clock;
pub mod delivery;
pub mod executor;
pub mod export;
pub mod flight;
pub mod metrics;
pub mod pool;
pub mod runner;
#[cfg(test)]
mod test_support;

pub use clock::{next_fire_after, Clock, ManualClock, SystemClock};
pub use delivery::{DeliveryCoordinator, DeliveryReport};
pub use executor::{Job, RunOutcome, TaskExecutor, TestPreview};
pub use export::{ExportContext, ExportFormat, Exporter, FileExporter};
pub use flight::{FlightGuard, FlightTable, InFlightRun, RunPhase};
pub use metrics::SchedulerMetrics;
pub use runner::{ReloadReport, Scheduler, SchedulerHandle, SchedulerStatus};
