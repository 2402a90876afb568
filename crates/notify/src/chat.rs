//! Chat-robot webhook notifier (DingTalk-style markdown messages).
//!
//! When a secret is configured every request URL is signed with
//! `timestamp` and `sign` query parameters, where `sign` is the
//! url-encoded base64 HMAC-SHA256 of `"{timestamp}\n{secret}"`.
//! A JSON reply with a non-zero `errcode` counts as a failure.

use std::time::Duration;

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sluice_core::config::ChatConfig;
use sluice_core::{ChatOverrides, DeliveryOptions, ExportArtifact, ExportMethod};

use crate::templating::{MessageContext, TemplateRenderer, DEFAULT_CHAT_MESSAGE, DEFAULT_FAILURE_MESSAGE};
use crate::traits::{Notifier, NotifyError, RunSummary};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Posts markdown messages to a chat robot webhook.
#[derive(Debug)]
pub struct ChatNotifier {
    default_url: Option<String>,
    default_secret: Option<String>,
    /// Base for download links, e.g. `http://host:5001`.
    file_server_url: String,
    timeout: Duration,
    renderer: TemplateRenderer,
    client: reqwest::Client,
}

impl ChatNotifier {
    /// `${VAR}` references in the default URL and secret are resolved eagerly.
    pub fn from_config(config: &ChatConfig) -> Result<Self, NotifyError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            default_url: config.webhook_url.as_deref().map(resolve_env_vars).transpose()?,
            default_secret: config.secret.as_deref().map(resolve_env_vars).transpose()?,
            file_server_url: config.file_server_url.trim_end_matches('/').to_string(),
            timeout,
            renderer: TemplateRenderer::new(),
            client,
        })
    }

    fn target(&self, overrides: &ChatOverrides) -> Result<(String, Option<String>), NotifyError> {
        let url = overrides
            .webhook_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(resolve_env_vars)
            .transpose()?
            .or_else(|| self.default_url.clone())
            .ok_or_else(|| NotifyError::Config("no chat webhook URL configured".to_string()))?;
        let secret = match overrides.secret.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(resolve_env_vars(s)?),
            None => self.default_secret.clone(),
        };
        Ok((url, secret))
    }

    fn download_url(&self, file_name: &str) -> String {
        format!(
            "{}/api/files/download/{}",
            self.file_server_url,
            urlencoding::encode(file_name)
        )
    }

    async fn post_markdown(
        &self,
        overrides: &ChatOverrides,
        title: &str,
        text: String,
    ) -> Result<(), NotifyError> {
        let (url, secret) = self.target(overrides)?;
        let url = match secret {
            Some(secret) => signed_url(&url, &secret, chrono::Utc::now().timestamp_millis())?,
            None => url,
        };

        let payload = serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "title": title, "text": text },
        });

        let reply: ChatReply = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if reply.errcode != 0 {
            return Err(NotifyError::Rejected(format!(
                "errcode {}: {}",
                reply.errcode, reply.errmsg
            )));
        }

        tracing::info!(channel = "chat", title, "notification delivered");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for ChatNotifier {
    async fn send(
        &self,
        artifact: &ExportArtifact,
        summary: &RunSummary,
        options: &DeliveryOptions,
    ) -> Result<(), NotifyError> {
        let overrides = options.chat.clone().unwrap_or_default();
        let mut ctx = MessageContext::for_export(summary, artifact);
        ctx.attachment_url = Some(self.download_url(&artifact.file_name));

        let template = overrides
            .message_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_CHAT_MESSAGE);
        let text = self.renderer.render(template, &ctx)?;

        let title = format!("Data export: {}", summary.task_name);
        self.post_markdown(&overrides, &title, text).await
    }

    async fn send_failure(
        &self,
        summary: &RunSummary,
        error: &str,
        options: &DeliveryOptions,
    ) -> Result<(), NotifyError> {
        let overrides = options.chat.clone().unwrap_or_default();
        let ctx = MessageContext::for_failure(summary, error);
        let text = self.renderer.render(DEFAULT_FAILURE_MESSAGE, &ctx)?;
        let title = format!("Data export failed: {}", summary.task_name);
        self.post_markdown(&overrides, &title, text).await
    }

    fn method(&self) -> ExportMethod {
        ExportMethod::Chat
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Compute the robot signature for a millisecond timestamp.
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    let digest = mac.finalize().into_bytes();
    let encoded = base64::engine::general_purpose::STANDARD.encode(digest);
    Ok(urlencoding::encode(&encoded).into_owned())
}

/// Append `timestamp` and `sign` to a webhook URL.
pub fn signed_url(url: &str, secret: &str, timestamp_ms: i64) -> Result<String, NotifyError> {
    let signature = sign(secret, timestamp_ms)?;
    let sep = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{sep}timestamp={timestamp_ms}&sign={signature}"))
}

/// Resolve `${VAR_NAME}` references against the process environment.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name).map_err(|_| {
                NotifyError::Config(format!("env var not found: {var_name}"))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
