//! Minijinja template rendering for channel messages.
//!
//! Email subjects and bodies and chat messages are arbitrary per-task
//! strings, so a fresh [`minijinja::Environment`] is created per render call.

use sluice_core::ExportArtifact;

use crate::traits::{NotifyError, RunSummary};

pub const DEFAULT_EMAIL_SUBJECT: &str = "[Data export] {{ task_name }} - {{ execution_time }}";

pub const DEFAULT_EMAIL_BODY: &str = "\
Task {{ task_name }} finished at {{ execution_time }}.

Rows: {{ rows_count }}
File: {{ filename }} ({{ file_size }})
Duration: {{ duration }}

The export is attached to this message.
";

pub const DEFAULT_CHAT_MESSAGE: &str = "\
### Data export finished

- **Task**: {{ task_name }}
- **Executed at**: {{ execution_time }}
- **Rows**: {{ rows_count }}
- **File size**: {{ file_size }}
- **Duration**: {{ duration }}

{% if attachment_url %}[Download {{ filename }}]({{ attachment_url }}){% endif %}
";

pub const DEFAULT_FAILURE_SUBJECT: &str = "[Data export failed] {{ task_name }}";

pub const DEFAULT_FAILURE_MESSAGE: &str = "\
### Data export failed

- **Task**: {{ task_name }}
- **Executed at**: {{ execution_time }}
- **Error**: {{ error }}
";

/// Variables available to channel templates.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MessageContext {
    pub task_name: String,
    pub execution_time: String,
    pub rows_count: u64,
    /// Human readable, e.g. `1.5 KB`.
    pub file_size: String,
    /// e.g. `2.35s`.
    pub duration: String,
    pub filename: String,
    pub file_path: String,
    pub attachment_url: Option<String>,
    pub error: Option<String>,
}

impl MessageContext {
    pub fn for_export(summary: &RunSummary, artifact: &ExportArtifact) -> Self {
        Self {
            task_name: summary.task_name.clone(),
            execution_time: summary.executed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            rows_count: summary.rows,
            file_size: human_size(artifact.size),
            duration: format!("{:.2}s", summary.duration_secs),
            filename: artifact.file_name.clone(),
            file_path: artifact.path.display().to_string(),
            attachment_url: None,
            error: None,
        }
    }

    pub fn for_failure(summary: &RunSummary, error: &str) -> Self {
        Self {
            task_name: summary.task_name.clone(),
            execution_time: summary.executed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            rows_count: summary.rows,
            duration: format!("{:.2}s", summary.duration_secs),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Format a byte count with binary units.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Renders channel templates using minijinja.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &MessageContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}
