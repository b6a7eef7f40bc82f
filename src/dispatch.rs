//! Top-level dispatch: resolve receivers, build notifiers, deliver.

use crate::config::{Config, ReceiverOptions};
use crate::core::{AlertData, Notifier};
use crate::error::NotifyError;
use crate::notifier::chatbot::{self, ChatbotNotifier};
use crate::notifier::email::{self, EmailNotifier, MailTransport, SmtpTransport};
use crate::notifier::slack::{self, SlackNotifier};
use crate::notifier::webhook::{self, WebhookNotifier};
use crate::notifier::NotifierContext;
use crate::receivers::Receiver;
use crate::resolver::ReceiverResolver;
use crate::secrets::SecretResolver;
use crate::template::TemplateEngine;
use crate::token::AccessTokenService;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Delivers alert groups to every receiver subscribed to them.
pub struct Dispatcher {
    resolver: ReceiverResolver,
    tenant_label: String,
    options: ReceiverOptions,
    global_template: Option<String>,
    context: NotifierContext,
    mail: Arc<dyn MailTransport>,
}

impl Dispatcher {
    /// Builds a dispatcher from configuration.
    ///
    /// Fails only when the configured template files cannot be loaded.
    pub fn new(config: &Config, secrets: Arc<dyn SecretResolver>) -> Result<Self, NotifyError> {
        let templates = Arc::new(TemplateEngine::new(&config.templates.files)?);
        Ok(Self {
            resolver: ReceiverResolver::new(config.receivers.clone()),
            tenant_label: config.tenant_label.clone(),
            options: config.options.clone(),
            global_template: config.templates.name.clone(),
            context: NotifierContext::new(templates, secrets),
            mail: Arc::new(SmtpTransport),
        })
    }

    pub fn with_mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.mail = transport;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<AccessTokenService>) -> Self {
        self.context = self.context.with_tokens(tokens);
        self
    }

    /// Builds one notifier per channel type present in `receivers`.
    pub fn notifiers(&self, receivers: Vec<Receiver>) -> Vec<Box<dyn Notifier>> {
        let mut chatbots = Vec::new();
        let mut emails = Vec::new();
        let mut webhooks = Vec::new();
        let mut slacks = Vec::new();
        for receiver in receivers {
            match receiver {
                Receiver::Chatbot(r) => chatbots.push(r),
                Receiver::Email(r) => emails.push(r),
                Receiver::Webhook(r) => webhooks.push(r),
                Receiver::Slack(r) => slacks.push(r),
            }
        }

        let template = self.global_template.as_deref();
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if !chatbots.is_empty() {
            notifiers.push(Box::new(ChatbotNotifier::new(
                chatbots,
                chatbot::default_settings().apply(&self.options.chatbot, template),
                self.context.clone(),
            )));
        }
        if !emails.is_empty() {
            notifiers.push(Box::new(EmailNotifier::new(
                emails,
                email::default_settings().apply(&self.options.email, template),
                self.context.clone(),
                self.mail.clone(),
            )));
        }
        if !webhooks.is_empty() {
            // Webhooks post JSON, so no template applies.
            notifiers.push(Box::new(WebhookNotifier::new(
                webhooks,
                webhook::default_settings().apply(&self.options.webhook, None),
                self.context.clone(),
            )));
        }
        if !slacks.is_empty() {
            notifiers.push(Box::new(SlackNotifier::new(
                slacks,
                slack::default_settings().apply(&self.options.slack, template),
                self.context.clone(),
            )));
        }
        notifiers
    }

    /// Delivers `data` through every channel concurrently.
    ///
    /// Returns every error from every channel; an empty list means all
    /// requests succeeded.
    #[instrument(skip_all, fields(alerts = data.alerts.len()))]
    pub async fn dispatch(&self, ctx: &CancellationToken, data: &AlertData) -> Vec<NotifyError> {
        let receivers = self.resolver.resolve(&self.tenant_label, data);
        if receivers.is_empty() {
            info!("No receivers subscribed to this alert group");
            return Vec::new();
        }

        let notifiers = self.notifiers(receivers);
        let start = Instant::now();
        let results = join_all(notifiers.iter().map(|n| n.notify(ctx, data))).await;

        let mut errors = Vec::new();
        for (notifier, channel_errors) in notifiers.iter().zip(results) {
            if !channel_errors.is_empty() {
                warn!(
                    channel = %notifier.channel(),
                    errors = channel_errors.len(),
                    "Channel reported delivery errors"
                );
            }
            errors.extend(channel_errors);
        }

        info!(
            channels = notifiers.len(),
            errors = errors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch finished"
        );
        errors
    }
}
