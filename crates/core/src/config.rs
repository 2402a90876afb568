use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskBody};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_parse_opt<T: std::str::FromStr>(profile: &str, key: &str) -> Option<T> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).map(|v| v.to_ascii_lowercase()) {
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub execution: ExecutionConfig,
    pub export: ExportConfig,
    pub delivery: DeliveryConfig,
    pub email: EmailConfig,
    pub chat: ChatConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SLUICE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SLUICE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            execution: ExecutionConfig::from_env_profiled(p),
            export: ExportConfig::from_env_profiled(p),
            delivery: DeliveryConfig::from_env_profiled(p),
            email: EmailConfig::from_env_profiled(p),
            chat: ChatConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!("  store:       {}", self.store.database_url);
        tracing::info!(
            "  scheduler:   workers={}, queue={}, grace={}s, tz={}",
            self.scheduler.resolved_workers(),
            self.scheduler.queue_capacity,
            self.scheduler.misfire_grace_secs,
            self.scheduler.default_timezone
        );
        tracing::info!(
            "  execution:   timeout={}s, preview_rows={}",
            self.execution.query_timeout_secs,
            self.execution.test_row_limit
        );
        tracing::info!("  export:      dir={}", self.export.output_dir.display());
        tracing::info!(
            "  email:       {}",
            if self.email.is_configured() { self.email.smtp_host.as_deref().unwrap_or("") } else { "(not configured)" }
        );
        tracing::info!(
            "  chat:        default webhook {}",
            if self.chat.webhook_url.is_some() { "set" } else { "(none)" }
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "SERVER_HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "SERVER_PORT", 5001),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            database_url: profiled_env_or(p, "DATABASE_URL", "sqlite://./data/sluice.db?mode=rwc"),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker count; 0 means available parallelism.
    pub worker_threads: usize,
    /// Jobs that may wait for a free worker before dispatch backs off.
    pub queue_capacity: usize,
    pub misfire_grace_secs: u64,
    pub redispatch_delay_ms: u64,
    /// 0 disables periodic reload.
    pub reload_interval_secs: u64,
    pub default_timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            queue_capacity: 16,
            misfire_grace_secs: 1800,
            redispatch_delay_ms: 1000,
            reload_interval_secs: 0,
            default_timezone: "UTC".to_string(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            worker_threads: profiled_env_parse(p, "SCHEDULER_WORKERS", d.worker_threads),
            queue_capacity: profiled_env_parse(p, "SCHEDULER_QUEUE_CAPACITY", d.queue_capacity),
            misfire_grace_secs: profiled_env_parse(p, "SCHEDULER_MISFIRE_GRACE_SECS", d.misfire_grace_secs),
            redispatch_delay_ms: profiled_env_parse(p, "SCHEDULER_REDISPATCH_DELAY_MS", d.redispatch_delay_ms),
            reload_interval_secs: profiled_env_parse(p, "SCHEDULER_RELOAD_INTERVAL_SECS", d.reload_interval_secs),
            default_timezone: profiled_env_or(p, "SCHEDULER_TIMEZONE", &d.default_timezone),
        }
    }

    pub fn resolved_workers(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }

    pub fn redispatch_delay(&self) -> Duration {
        Duration::from_millis(self.redispatch_delay_ms.max(1))
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_secs > 0).then(|| Duration::from_secs(self.reload_interval_secs))
    }
}

// ── Execution ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Global default timeout.
    pub query_timeout_secs: u64,
    pub sql_timeout_secs: Option<u64>,
    pub script_timeout_secs: Option<u64>,
    pub test_row_limit: usize,
    pub script_interpreter: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 3600,
            sql_timeout_secs: None,
            script_timeout_secs: None,
            test_row_limit: 10,
            script_interpreter: "python3".to_string(),
        }
    }
}

impl ExecutionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            query_timeout_secs: profiled_env_parse(p, "QUERY_TIMEOUT_SECS", d.query_timeout_secs),
            sql_timeout_secs: profiled_env_parse_opt(p, "SQL_TIMEOUT_SECS"),
            script_timeout_secs: profiled_env_parse_opt(p, "SCRIPT_TIMEOUT_SECS"),
            test_row_limit: profiled_env_parse(p, "TEST_ROW_LIMIT", d.test_row_limit),
            script_interpreter: profiled_env_or(p, "SCRIPT_INTERPRETER", &d.script_interpreter),
        }
    }

    /// Task override, else task-type default, else the global default.
    pub fn timeout_for(&self, task: &Task) -> Duration {
        let type_default = match task.body {
            TaskBody::Sql { .. } => self.sql_timeout_secs,
            TaskBody::Script { .. } => self.script_timeout_secs,
        };
        let secs = task
            .timeout_secs
            .or(type_default)
            .unwrap_or(self.query_timeout_secs)
            .max(1);
        Duration::from_secs(secs)
    }
}

// ── Export ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    /// `csv` or `json`.
    pub format: String,
}

impl ExportConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            output_dir: PathBuf::from(profiled_env_or(p, "EXPORT_OUTPUT_DIR", "./exports")),
            format: profiled_env_or(p, "EXPORT_FORMAT", "csv").to_lowercase(),
        }
    }
}

// ── Delivery ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Hard cap on any single channel send.
    pub notifier_timeout_cap_secs: u64,
}

impl DeliveryConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            notifier_timeout_cap_secs: profiled_env_parse(p, "NOTIFIER_TIMEOUT_CAP_SECS", 120),
        }
    }

    pub fn notifier_cap(&self) -> Duration {
        Duration::from_secs(self.notifier_timeout_cap_secs.max(1))
    }
}

// ── Email ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub tls: bool,
    pub from: Option<String>,
    #[serde(skip_serializing)]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl EmailConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            smtp_host: profiled_env_opt(p, "SMTP_HOST"),
            smtp_port: profiled_env_parse(p, "SMTP_PORT", 587),
            tls: profiled_env_bool(p, "SMTP_TLS", true),
            from: profiled_env_opt(p, "SMTP_FROM"),
            username: profiled_env_opt(p, "SMTP_USERNAME"),
            password: profiled_env_opt(p, "SMTP_PASSWORD"),
            retry_attempts: profiled_env_parse(p, "SMTP_RETRY_ATTEMPTS", 3),
            retry_delay_secs: profiled_env_parse(p, "SMTP_RETRY_DELAY_SECS", 30),
            timeout_secs: profiled_env_parse(p, "SMTP_TIMEOUT_SECS", 60),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from.is_some()
    }
}

// ── Chat webhook ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub webhook_url: Option<String>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Base URL used to build download links for exported files.
    pub file_server_url: String,
    pub timeout_secs: u64,
}

impl ChatConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhook_url: profiled_env_opt(p, "CHAT_WEBHOOK_URL"),
            secret: profiled_env_opt(p, "CHAT_WEBHOOK_SECRET"),
            file_server_url: profiled_env_or(p, "CHAT_FILE_SERVER_URL", "http://localhost:5001"),
            timeout_secs: profiled_env_parse(p, "CHAT_TIMEOUT_SECS", 10),
        }
    }
}
