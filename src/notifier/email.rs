//! SMTP notifier.
//!
//! Receivers sharing a smart host, sender address and login are merged and
//! their recipients packed into mails of at most [`RECIPIENT_BATCH_SIZE`]
//! addresses. The actual delivery goes through a [`MailTransport`], which is
//! lettre's async SMTP client outside of tests.

use super::{ChannelSettings, NotifierContext};
use crate::batch::batches;
use crate::core::{AlertData, Notifier};
use crate::error::NotifyError;
use crate::group::Group;
use crate::receivers::{merge, ChannelKind, EmailReceiver};
use crate::template::{DEFAULT_HTML, DEFAULT_SUBJECT};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MESSAGE_MAX_SIZE: usize = 1024 * 1024;
pub const RECIPIENT_BATCH_SIZE: usize = 100;

const CHANNEL: &str = "email";

/// Built-in settings before channel options are applied.
pub fn default_settings() -> ChannelSettings {
    ChannelSettings {
        timeout: DEFAULT_TIMEOUT,
        template: DEFAULT_HTML.to_string(),
        message_max_size: MESSAGE_MAX_SIZE,
        token_expires: Duration::ZERO,
    }
}

/// Where and how to submit a mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
    pub timeout: Duration,
}

/// A rendered mail ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Submits mails to an SMTP server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, server: &SmtpSettings, mail: &Mail) -> Result<(), NotifyError>;
}

/// [`MailTransport`] backed by lettre's tokio SMTP client.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpTransport;

impl SmtpTransport {
    fn message(mail: &Mail) -> Result<Message, NotifyError> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| NotifyError::Email(format!("invalid from address {}: {e}", mail.from)))?;
        let mut builder = Message::builder().from(from);
        for to in &mail.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| NotifyError::Email(format!("invalid recipient {to}: {e}")))?;
            builder = builder.to(mailbox);
        }
        builder
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(mail.html.clone())
            .map_err(|e| NotifyError::Email(format!("failed to build mail: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, server: &SmtpSettings, mail: &Mail) -> Result<(), NotifyError> {
        let message = Self::message(mail)?;

        let builder = if server.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host).map_err(|e| {
                NotifyError::Email(format!("failed to create SMTP transport: {e}"))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
        };
        let mut builder = builder.port(server.port).timeout(Some(server.timeout));
        if let Some(username) = &server.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                server.password.clone().unwrap_or_default(),
            ));
        }

        builder
            .build()
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::Email(format!("failed to send mail: {e}")))
    }
}

/// Sends alert data as HTML mail.
pub struct EmailNotifier {
    receivers: Vec<EmailReceiver>,
    settings: ChannelSettings,
    context: NotifierContext,
    transport: Arc<dyn MailTransport>,
}

impl EmailNotifier {
    pub fn new(
        receivers: impl IntoIterator<Item = EmailReceiver>,
        settings: ChannelSettings,
        context: NotifierContext,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let valid = receivers.into_iter().filter(|receiver| match validate(receiver) {
            Ok(()) => true,
            Err(reason) => {
                warn!(receiver = %receiver.name, reason, "Dropping email receiver");
                false
            }
        });

        Self {
            receivers: merge(valid),
            settings,
            context,
            transport,
        }
    }

    pub fn receivers(&self) -> &[EmailReceiver] {
        &self.receivers
    }

    async fn smtp_settings(&self, receiver: &EmailReceiver) -> Result<SmtpSettings, NotifyError> {
        let password = match &receiver.password {
            Some(secret) => Some(
                self.context
                    .secrets
                    .get_secret_data(&receiver.namespace, secret)
                    .await?,
            ),
            None => None,
        };
        Ok(SmtpSettings {
            host: receiver.smart_host.clone(),
            port: receiver.port,
            username: receiver.username.clone(),
            password,
            starttls: receiver.starttls,
            timeout: self.settings.timeout_for(receiver.timeout_seconds),
        })
    }
}

fn validate(receiver: &EmailReceiver) -> Result<(), &'static str> {
    if receiver.smart_host.is_empty() {
        return Err("missing smart host");
    }
    if receiver.from.is_empty() {
        return Err("missing from address");
    }
    if receiver.password.is_some() && receiver.username.as_deref().unwrap_or("").is_empty() {
        return Err("password without username");
    }
    Ok(())
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    #[instrument(skip_all, fields(channel = CHANNEL, alerts = data.alerts.len(), instances = self.receivers.len()))]
    async fn notify(&self, ctx: &CancellationToken, data: &AlertData) -> Vec<NotifyError> {
        if data.is_empty() {
            return Vec::new();
        }

        let templates = &self.context.templates;
        let mut rendered = Vec::new();
        for receiver in &self.receivers {
            let body_template = self.settings.template_for(receiver.template.as_deref());
            let subject_template = receiver
                .subject_template
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_SUBJECT);
            let parts = templates
                .split(data, self.settings.message_max_size, body_template)
                .and_then(|chunks| {
                    chunks
                        .into_iter()
                        .map(|chunk| -> Result<(String, String), NotifyError> {
                            let subject =
                                templates.render(subject_template, &data.slice(chunk.range))?;
                            Ok((subject.trim().to_string(), chunk.text))
                        })
                        .collect::<Result<Vec<_>, NotifyError>>()
                });
            match parts {
                Ok(parts) => rendered.push((receiver, parts)),
                Err(e) => {
                    error!(error = %e, "Failed to render email");
                    return vec![e];
                }
            }
        }

        let mut errors = Vec::new();
        let mut group = Group::new(ctx);
        for (receiver, parts) in rendered {
            let server = match self.smtp_settings(receiver).await {
                Ok(server) => Arc::new(server),
                Err(e) => {
                    error!(host = %receiver.smart_host, error = %e, "Skipping email receiver");
                    errors.push(e);
                    continue;
                }
            };
            let size = receiver
                .batch_size
                .map_or(RECIPIENT_BATCH_SIZE, |size| size.clamp(1, RECIPIENT_BATCH_SIZE));
            for recipients in batches(&receiver.to, size) {
                for (subject, html) in &parts {
                    let mail = Mail {
                        from: receiver.from.clone(),
                        to: recipients.to_vec(),
                        subject: subject.clone(),
                        html: html.clone(),
                    };
                    let server = server.clone();
                    let transport = self.transport.clone();
                    group.add(async move { deliver(transport.as_ref(), &server, &mail).await });
                }
            }
        }

        debug!(tasks = group.len(), "Dispatching mails");
        errors.extend(group.wait().await);
        errors
    }
}

async fn deliver(
    transport: &dyn MailTransport,
    server: &SmtpSettings,
    mail: &Mail,
) -> Result<(), NotifyError> {
    let start = Instant::now();
    let result = transport.send(server, mail).await;
    match &result {
        Ok(()) => {
            debug!(
                host = %server.host,
                recipients = mail.to.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Mail sent"
            );
            metrics::counter!("notifications_sent_total", "channel" => CHANNEL).increment(1);
        }
        Err(e) => {
            error!(host = %server.host, error = %e, "Failed to send mail");
            metrics::counter!("notifications_failed_total", "channel" => CHANNEL).increment(1);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: &[&str]) -> Mail {
        Mail {
            from: "alerts@example.com".into(),
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "[FIRING:1] CPUHigh".into(),
            html: "<p>cpu</p>".into(),
        }
    }

    #[test]
    fn test_message_carries_every_recipient() {
        let message = SmtpTransport::message(&mail(&["a@example.com", "b@example.com"])).unwrap();
        let to = message.headers().get_raw("To").unwrap();
        assert!(to.contains("a@example.com"));
        assert!(to.contains("b@example.com"));
    }

    #[test]
    fn test_message_rejects_bad_address() {
        let result = SmtpTransport::message(&mail(&["not an address"]));
        assert!(matches!(result, Err(NotifyError::Email(_))));
    }

    #[test]
    fn test_validate() {
        let mut receiver = EmailReceiver {
            smart_host: "smtp.local".into(),
            from: "alerts@example.com".into(),
            ..Default::default()
        };
        assert!(validate(&receiver).is_ok());

        receiver.password = Some(crate::receivers::SecretRef::new("smtp"));
        assert_eq!(validate(&receiver), Err("password without username"));

        receiver.username = Some("alerts".into());
        assert!(validate(&receiver).is_ok());

        receiver.smart_host.clear();
        assert_eq!(validate(&receiver), Err("missing smart host"));
    }
}
