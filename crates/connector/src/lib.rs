//! Data source registry: pooled SQL execution and script tasks.
//!
//! SQL runs through sqlx's `Any` driver so one registry can serve
//! PostgreSQL, MySQL and SQLite sources. Script tasks run as child
//! processes speaking JSON over stdin/stdout.

pub mod decode;
pub mod registry;
pub mod script;

pub use registry::SqlRegistry;
pub use script::ScriptRunner;
