use clap::{Parser, Subcommand};

/// Command-line client for a running sluice server.
#[derive(Parser, Debug)]
#[command(name = "sluice", about = "Control the sluice export scheduler")]
pub struct CliArgs {
    /// Base URL of the sluice server
    #[arg(long, env = "SLUICE_SERVER", default_value = "http://localhost:5001")]
    pub server: String,

    /// Print raw JSON responses instead of tables
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show scheduler state, upcoming fires and in-flight runs
    Status,
    /// Re-read task definitions and rebuild the schedule
    Reload,
    /// Start a manual run of a task
    Run { task_id: i64 },
    /// Cancel the in-flight run of a task
    Cancel { task_id: i64 },
    /// Preview a task without exporting or recording history
    Test {
        task_id: i64,
        /// Maximum rows to fetch
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List recent executions of a task, newest first
    History {
        task_id: i64,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show one execution record
    Execution { execution_id: uuid::Uuid },
}
