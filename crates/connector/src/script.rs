//! Script task runner.
//!
//! A script is started as a child process with the function name as its
//! only argument (Python files go through the configured interpreter). The
//! process receives a JSON payload on stdin and must print one JSON object
//! on stdout:
//!
//! ```json
//! {"columns": ["id", "total"], "rows": [[1, 9.5]], "row_count": 1}
//! ```
//!
//! Rows may also be objects keyed by column name. The child is killed if
//! the run is dropped (timeout or cancellation).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::{DataSource, ResultSet, ScriptContext, SluiceError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 2000;

#[derive(Debug, Serialize)]
struct ScriptPayload<'a> {
    function: &'a str,
    context: &'a ScriptContext,
    data_source: &'a DataSource,
}

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    row_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
}

impl ScriptRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    fn command(&self, script_path: &Path, function_name: &str) -> Command {
        let is_python = script_path.extension().is_some_and(|e| e == "py");
        let mut cmd = if is_python {
            let mut c = Command::new(&self.interpreter);
            c.arg(script_path);
            c
        } else {
            Command::new(script_path)
        };
        cmd.arg(function_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = script_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd
    }

    pub async fn run(
        &self,
        script_path: &str,
        function_name: &str,
        context: &ScriptContext,
        data_source: &DataSource,
        timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        let path = std::fs::canonicalize(script_path).map_err(|e| {
            SluiceError::ScriptExecution(format!("script {script_path} not found: {e}"))
        })?;

        let payload = serde_json::to_vec(&ScriptPayload {
            function: function_name,
            context,
            data_source,
        })
        .map_err(|e| SluiceError::ScriptExecution(e.to_string()))?;

        let mut child = self
            .command(&path, function_name)
            .spawn()
            .map_err(|e| SluiceError::ScriptExecution(format!("failed to start {script_path}: {e}")))?;

        tracing::debug!(script = %path.display(), function = function_name, "script started");

        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                // A script that ignores stdin may close it early; that is not an error.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(error = %e, "script closed stdin early");
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| SluiceError::TimeoutExceeded {
                secs: timeout.as_secs(),
            })?
            .map_err(|e| SluiceError::ScriptExecution(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let excerpt = if stderr.len() > STDERR_EXCERPT {
                let start = stderr.len() - STDERR_EXCERPT;
                let start = (start..stderr.len())
                    .find(|i| stderr.is_char_boundary(*i))
                    .unwrap_or(start);
                &stderr[start..]
            } else {
                stderr
            };
            return Err(SluiceError::ScriptExecution(format!(
                "{function_name} exited with {}: {excerpt}",
                output.status
            )));
        }

        parse_output(&output.stdout)
    }
}

fn parse_output(stdout: &[u8]) -> Result<ResultSet, SluiceError> {
    let parsed: ScriptOutput = serde_json::from_slice(stdout)
        .map_err(|e| SluiceError::ScriptExecution(format!("invalid script output: {e}")))?;

    let mut columns = parsed.columns;
    if columns.is_empty() {
        if let Some(Value::Object(first)) = parsed.rows.first() {
            columns = first.keys().cloned().collect();
        }
    }

    let rows = parsed
        .rows
        .into_iter()
        .map(|row| match row {
            Value::Array(cells) => cells,
            Value::Object(mut map) => columns
                .iter()
                .map(|c| map.remove(c).unwrap_or(Value::Null))
                .collect(),
            scalar => vec![scalar],
        })
        .collect();

    Ok(ResultSet {
        columns,
        rows,
        reported_rows: parsed.row_count,
    })
}
