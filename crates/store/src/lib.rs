//! Durable task definitions and execution history on SQLite.
//!
//! [`SqliteStore`] implements both [`sluice_core::TaskRepository`] and
//! [`sluice_core::DataSourceCatalog`]. Migrations are embedded and run on
//! connect.

mod error;
mod rows;
mod store;

pub use error::StoreError;
pub use store::{NewTask, SqliteStore};
