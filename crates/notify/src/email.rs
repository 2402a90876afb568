//! SMTP email notifier via `lettre` with TLS support.
//!
//! Sends the export as an attachment to the task's recipients. Each send is
//! retried a configured number of times with a fixed delay in between.

use std::time::Duration;

use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use sluice_core::config::EmailConfig;
use sluice_core::{DeliveryOptions, EmailOverrides, ExportArtifact, ExportMethod};

use crate::templating::{
    MessageContext, TemplateRenderer, DEFAULT_EMAIL_BODY, DEFAULT_EMAIL_SUBJECT,
    DEFAULT_FAILURE_MESSAGE, DEFAULT_FAILURE_SUBJECT,
};
use crate::traits::{Notifier, NotifyError, RunSummary};

/// Sends exports as email attachments via SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    retry_attempts: u32,
    retry_delay: Duration,
    send_timeout: Duration,
    renderer: TemplateRenderer,
}

impl EmailNotifier {
    /// Build an `EmailNotifier` from SMTP configuration.
    ///
    /// Port 465 uses implicit TLS; any other port uses STARTTLS when `tls` is
    /// set and a plain connection otherwise.
    pub fn from_config(config: &EmailConfig) -> Result<Self, NotifyError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| NotifyError::Config("SMTP host is not configured".to_string()))?;
        let from = config
            .from
            .as_deref()
            .ok_or_else(|| NotifyError::Config("sender address is not configured".to_string()))?;

        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let port = config.smtp_port;
        let send_timeout = Duration::from_secs(config.timeout_secs.max(1));

        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port)
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.timeout(Some(send_timeout)).build(),
            from: from_mailbox,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            send_timeout,
            renderer: TemplateRenderer::new(),
        })
    }

    fn recipients(options: &DeliveryOptions) -> Result<Vec<Mailbox>, NotifyError> {
        let recipients: Vec<Mailbox> = options
            .email
            .as_ref()
            .map(|e| e.recipients.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(|addr| {
                addr.parse()
                    .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        if recipients.is_empty() {
            return Err(NotifyError::Config(
                "at least one recipient is required".to_string(),
            ));
        }
        Ok(recipients)
    }

    fn message_builder(&self, to: &[Mailbox], subject: &str) -> lettre::message::MessageBuilder {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in to {
            builder = builder.to(recipient.clone());
        }
        builder
    }

    /// Send with retries; returns the last error when every attempt fails.
    async fn send_with_retry(&self, email: Message, recipients: usize) -> Result<(), NotifyError> {
        let mut last_error = None;
        for attempt in 1..=self.retry_attempts {
            match self.transport.send(email.clone()).await {
                Ok(_) => {
                    tracing::info!(channel = "email", recipients, attempt, "notification delivered");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(channel = "email", attempt, error = %e, "email send failed");
                    last_error = Some(e.to_string());
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(NotifyError::Smtp(format!(
            "giving up after {} attempts: {}",
            self.retry_attempts,
            last_error.unwrap_or_default()
        )))
    }
}

fn attachment_content_type(file_name: &str) -> ContentType {
    let mime = if file_name.ends_with(".csv") {
        "text/csv"
    } else if file_name.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    };
    ContentType::parse(mime).unwrap_or(ContentType::TEXT_PLAIN)
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(
        &self,
        artifact: &ExportArtifact,
        summary: &RunSummary,
        options: &DeliveryOptions,
    ) -> Result<(), NotifyError> {
        let to = Self::recipients(options)?;
        let overrides = options.email.clone().unwrap_or_else(EmailOverrides::default);
        let ctx = MessageContext::for_export(summary, artifact);

        let subject = self.renderer.render(
            overrides.subject.as_deref().unwrap_or(DEFAULT_EMAIL_SUBJECT),
            &ctx,
        )?;
        let body = self
            .renderer
            .render(overrides.body.as_deref().unwrap_or(DEFAULT_EMAIL_BODY), &ctx)?;

        let bytes = tokio::fs::read(&artifact.path).await?;
        let attachment = Attachment::new(artifact.file_name.clone())
            .body(bytes, attachment_content_type(&artifact.file_name));

        let email = self
            .message_builder(&to, &subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(attachment),
            )
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.send_with_retry(email, to.len()).await
    }

    async fn send_failure(
        &self,
        summary: &RunSummary,
        error: &str,
        options: &DeliveryOptions,
    ) -> Result<(), NotifyError> {
        let to = Self::recipients(options)?;
        let ctx = MessageContext::for_failure(summary, error);
        let subject = self.renderer.render(DEFAULT_FAILURE_SUBJECT, &ctx)?;
        let body = self.renderer.render(DEFAULT_FAILURE_MESSAGE, &ctx)?;

        let email = self
            .message_builder(&to, &subject)
            .body(body)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.send_with_retry(email, to.len()).await
    }

    fn method(&self) -> ExportMethod {
        ExportMethod::Email
    }

    fn timeout(&self) -> Duration {
        (self.send_timeout + self.retry_delay) * self.retry_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: Some("smtp.example.com".to_string()),
            smtp_port: 587,
            tls: true,
            from: Some("exports@example.com".to_string()),
            username: None,
            password: None,
            retry_attempts: 3,
            retry_delay_secs: 30,
            timeout_secs: 60,
        }
    }

    fn options(recipients: &[&str]) -> DeliveryOptions {
        DeliveryOptions {
            email: Some(EmailOverrides {
                recipients: recipients.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            }),
            chat: None,
        }
    }

    #[test]
    fn from_config_valid() {
        let notifier = EmailNotifier::from_config(&config()).unwrap();
        assert_eq!(notifier.channel_name(), "email");
        assert_eq!(notifier.method(), ExportMethod::Email);
    }

    #[test]
    fn from_config_requires_host_and_sender() {
        let mut cfg = config();
        cfg.smtp_host = None;
        assert!(EmailNotifier::from_config(&cfg).is_err());

        let mut cfg = config();
        cfg.from = Some("bad-address".to_string());
        let err = EmailNotifier::from_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("Configuration error"), "got: {err}");
    }

    #[test]
    fn from_config_implicit_tls_and_plain() {
        let mut cfg = config();
        cfg.smtp_port = 465;
        assert!(EmailNotifier::from_config(&cfg).is_ok());

        let mut cfg = config();
        cfg.smtp_port = 25;
        cfg.tls = false;
        assert!(EmailNotifier::from_config(&cfg).is_ok());
    }

    #[test]
    fn recipients_are_required() {
        let err = EmailNotifier::recipients(&options(&[])).unwrap_err().to_string();
        assert!(err.contains("at least one recipient"), "got: {err}");
        assert!(EmailNotifier::recipients(&DeliveryOptions::default()).is_err());
        assert!(EmailNotifier::recipients(&options(&["not-valid"])).is_err());
        assert_eq!(
            EmailNotifier::recipients(&options(&["a@example.com", " ", "b@example.com"]))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn timeout_covers_every_attempt() {
        let notifier = EmailNotifier::from_config(&config()).unwrap();
        assert_eq!(notifier.timeout(), Duration::from_secs(270));
    }
}
