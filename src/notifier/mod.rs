//! Channel notifiers.
//!
//! Every channel type gets one notifier built from all the receivers that
//! resolved for an alert group. Notifiers share a [`NotifierContext`] holding
//! the template engine, the access-token cache, the secret resolver and the
//! HTTP client.

pub mod chatbot;
pub mod email;
pub mod http;
pub mod slack;
pub mod webhook;

use crate::config::ChannelOptions;
use crate::secrets::SecretResolver;
use crate::template::TemplateEngine;
use crate::token::AccessTokenService;
use metrics::Unit;
use std::sync::Arc;
use std::time::Duration;

/// Services shared by every notifier of a dispatch.
#[derive(Clone)]
pub struct NotifierContext {
    pub templates: Arc<TemplateEngine>,
    pub tokens: Arc<AccessTokenService>,
    pub secrets: Arc<dyn SecretResolver>,
    pub client: reqwest::Client,
}

impl NotifierContext {
    /// Creates a context backed by the process-wide token cache.
    pub fn new(templates: Arc<TemplateEngine>, secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            templates,
            tokens: AccessTokenService::global(),
            secrets,
            client: reqwest::Client::new(),
        }
    }

    /// Replaces the token cache, e.g. with an isolated one in tests.
    pub fn with_tokens(mut self, tokens: Arc<AccessTokenService>) -> Self {
        self.tokens = tokens;
        self
    }
}

/// Effective per-channel settings after applying overrides to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub timeout: Duration,
    pub template: String,
    pub message_max_size: usize,
    pub token_expires: Duration,
}

impl ChannelSettings {
    /// Layers the channel options, then the global template, over `self`.
    ///
    /// A channel-level template wins over the global one.
    pub fn apply(mut self, options: &ChannelOptions, global_template: Option<&str>) -> Self {
        if let Some(seconds) = options.timeout_seconds {
            self.timeout = Duration::from_secs(seconds);
        }
        if let Some(template) = options.template.as_deref().or(global_template) {
            self.template = template.to_string();
        }
        if let Some(size) = options.message_max_size {
            self.message_max_size = size;
        }
        if let Some(seconds) = options.token_expires_seconds {
            self.token_expires = Duration::from_secs(seconds);
        }
        self
    }

    /// The request timeout for a receiver that may override it.
    pub fn timeout_for(&self, receiver_seconds: Option<u64>) -> Duration {
        receiver_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.timeout)
    }

    /// The template for a receiver that may override it.
    pub fn template_for<'a>(&'a self, receiver_template: Option<&'a str>) -> &'a str {
        receiver_template
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.template)
    }
}

/// Registers descriptions for the delivery metrics with the global recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "notifications_sent_total",
        Unit::Count,
        "Total number of outbound notification requests that succeeded."
    );
    metrics::describe_counter!(
        "notifications_failed_total",
        Unit::Count,
        "Total number of outbound notification requests that failed."
    );
    metrics::describe_counter!(
        "access_token_fetches_total",
        Unit::Count,
        "Total number of access tokens fetched from credential endpoints."
    );
    metrics::describe_counter!(
        "access_token_invalidations_total",
        Unit::Count,
        "Total number of cached access tokens dropped after being rejected."
    );
}
