mod cli;
mod output;
mod server_client;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use crate::cli::{CliArgs, Command};
use crate::server_client::ServerClient;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let client = ServerClient::new(&args.server)?;
    tracing::debug!(server = %args.server, command = ?args.command, "sending request");

    match args.command {
        Command::Status => {
            let status = client.status().await?;
            if args.json {
                print_json(&status)?;
            } else {
                print!("{}", output::status(&status));
            }
        }
        Command::Reload => {
            let report = client.reload().await?;
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "scheduled {}  added {}  rescheduled {}  removed {}",
                    report["scheduled"],
                    report["added"].as_array().map_or(0, Vec::len),
                    report["rescheduled"].as_array().map_or(0, Vec::len),
                    report["removed"].as_array().map_or(0, Vec::len),
                );
                for error in report["errors"].as_array().into_iter().flatten() {
                    println!("  task {}: {}", error["task_id"], error["message"]);
                }
            }
        }
        Command::Run { task_id } => {
            let accepted = client.execute(task_id).await?;
            println!("accepted execution {}", accepted.execution_id);
        }
        Command::Cancel { task_id } => {
            let result = client.cancel(task_id).await?;
            if result.cancelled {
                println!("cancellation requested for task {task_id}");
            } else {
                println!("task {task_id} has no run in flight");
            }
        }
        Command::Test { task_id, limit } => {
            let preview = client.test(task_id, limit).await?;
            if args.json {
                print_json(&preview)?;
            } else {
                print!("{}", output::preview(&preview));
            }
        }
        Command::History { task_id, limit } => {
            let records = client.history(task_id, limit).await?;
            if args.json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("no executions for task {task_id}");
            } else {
                for record in &records {
                    println!("{}", output::record_line(record));
                }
            }
        }
        Command::Execution { execution_id } => {
            let record = client.execution(execution_id).await?;
            if args.json {
                print_json(&record)?;
            } else {
                print!("{}", output::record_detail(&record));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    run(CliArgs::parse()).await
}
