//! Task definitions as stored by the task repository.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SluiceError;

pub type TaskId = i64;
pub type DataSourceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Inactive,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "paused" => Ok(Self::Paused),
            other => Err(SluiceError::InvalidTask(format!("unknown status '{other}'"))),
        }
    }
}

/// What a task runs. Exactly one body per execution type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "execution_type", rename_all = "snake_case")]
pub enum TaskBody {
    Sql {
        sql_content: String,
    },
    Script {
        script_path: String,
        script_function: String,
    },
}

impl TaskBody {
    pub fn execution_type(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
            Self::Script { .. } => "script",
        }
    }
}

/// Delivery channel requested by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMethod {
    Local,
    Email,
    #[serde(alias = "webhook", alias = "dingtalk")]
    Chat,
}

impl ExportMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Email => "email",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for ExportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task email overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailOverrides {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Per-task chat webhook overrides. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOverrides {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub message_template: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    #[serde(default)]
    pub email: Option<EmailOverrides>,
    #[serde(default)]
    pub chat: Option<ChatOverrides>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub data_source_id: DataSourceId,
    #[serde(flatten)]
    pub body: TaskBody,
    /// Absent means the task only runs on demand.
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// IANA zone name; the scheduler default applies when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub export_methods: Vec<ExportMethod>,
    #[serde(default)]
    pub export_filename: Option<String>,
    #[serde(default)]
    pub delivery: DeliveryOptions,
    /// Overrides the task-type and global timeout defaults.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Task {
    /// Trimmed cron expression, `None` when empty or missing.
    pub fn cron(&self) -> Option<&str> {
        self.cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Active and cron-bearing.
    pub fn is_schedulable(&self) -> bool {
        self.status == TaskStatus::Active && self.cron().is_some()
    }

    pub fn wants(&self, method: ExportMethod) -> bool {
        self.export_methods.contains(&method)
    }

    /// Structural checks run before previews and on save.
    ///
    /// Cron syntax is checked by the scheduler's clock, which owns the parser.
    pub fn validate(&self) -> TaskValidation {
        let mut report = TaskValidation::default();

        if self.name.trim().is_empty() {
            report.errors.push("task name is required".to_string());
        }

        match &self.body {
            TaskBody::Sql { sql_content } => {
                let sql = sql_content.trim();
                if sql.is_empty() {
                    report.errors.push("SQL content is required".to_string());
                } else {
                    let first = sql
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_ascii_lowercase();
                    if first != "select" && first != "with" {
                        report
                            .warnings
                            .push("SQL does not start with SELECT; export expects a result set".to_string());
                    }
                }
            }
            TaskBody::Script {
                script_path,
                script_function,
            } => {
                if script_path.trim().is_empty() {
                    report.errors.push("script path is required".to_string());
                }
                if script_function.trim().is_empty() {
                    report.errors.push("script function is required".to_string());
                }
            }
        }

        if self.wants(ExportMethod::Email) {
            let has_recipients = self
                .delivery
                .email
                .as_ref()
                .is_some_and(|e| e.recipients.iter().any(|r| !r.trim().is_empty()));
            if !has_recipients {
                report
                    .errors
                    .push("email delivery requires at least one recipient".to_string());
            }
        }

        if self.wants(ExportMethod::Chat) {
            let has_webhook = self
                .delivery
                .chat
                .as_ref()
                .and_then(|c| c.webhook_url.as_deref())
                .is_some_and(|u| !u.trim().is_empty());
            if !has_webhook {
                report
                    .warnings
                    .push("no chat webhook override; the configured default will be used".to_string());
            }
        }

        if self.timeout_secs == Some(0) {
            report.errors.push("timeout must be greater than zero".to_string());
        }

        report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TaskValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
