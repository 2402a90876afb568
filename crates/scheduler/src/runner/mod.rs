//! Scheduler runner: owns the live schedule and drives the worker pool.
//!
//! Split into focused submodules:
//! - `core`: Scheduler lifecycle and the cloneable control handle
//! - `coordinator`: the loop that fires due entries and serves commands
//! - `schedule`: task id to next fire time, reload and misfire handling
//! - `commands`: messages from handles to the coordinator, status views

mod commands;
mod coordinator;
mod core;
mod schedule;

pub use self::commands::{SchedulerStatus, WorkerStatus};
pub use self::core::{Scheduler, SchedulerHandle};
pub use self::schedule::{NextFire, ReloadError, ReloadReport};
