//! Generic HTTP webhook notifier.
//!
//! The alert data is posted as JSON, split so that each request body stays
//! under the configured size. A webhook may authenticate with a static
//! bearer token or with OAuth2 client credentials; only the latter can be
//! refreshed, so only then does a `401` take the retry path.

use super::http;
use super::{ChannelSettings, NotifierContext};
use crate::core::{AlertData, Notifier};
use crate::error::NotifyError;
use crate::group::Group;
use crate::receivers::{merge, ChannelKind, WebhookReceiver};
use crate::secrets::SecretResolver;
use crate::template::split_with;
use crate::token::{AccessToken, AccessTokenService};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MESSAGE_MAX_SIZE: usize = 256 * 1024;
pub const DEFAULT_TOKEN_EXPIRES: Duration = Duration::from_secs(60 * 60);

const CHANNEL: &str = "webhook";

/// Built-in settings before channel options are applied.
pub fn default_settings() -> ChannelSettings {
    ChannelSettings {
        timeout: DEFAULT_TIMEOUT,
        template: String::new(),
        message_max_size: MESSAGE_MAX_SIZE,
        token_expires: DEFAULT_TOKEN_EXPIRES,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Posts alert data to every distinct webhook.
pub struct WebhookNotifier {
    receivers: Vec<WebhookReceiver>,
    settings: ChannelSettings,
    context: NotifierContext,
}

impl WebhookNotifier {
    pub fn new(
        receivers: impl IntoIterator<Item = WebhookReceiver>,
        settings: ChannelSettings,
        context: NotifierContext,
    ) -> Self {
        let valid = receivers.into_iter().filter(|receiver| match validate(receiver) {
            Ok(()) => true,
            Err(reason) => {
                warn!(receiver = %receiver.name, reason, "Dropping webhook receiver");
                false
            }
        });

        Self {
            receivers: merge(valid),
            settings,
            context,
        }
    }

    pub fn receivers(&self) -> &[WebhookReceiver] {
        &self.receivers
    }
}

fn validate(receiver: &WebhookReceiver) -> Result<(), &'static str> {
    if url::Url::parse(&receiver.url).is_err() {
        return Err("invalid url");
    }
    if let Some(token_url) = &receiver.token_url {
        if url::Url::parse(token_url).is_err() {
            return Err("invalid token url");
        }
        if receiver.client_id.as_deref().unwrap_or("").is_empty()
            || receiver.client_secret.is_none()
        {
            return Err("token url without client credentials");
        }
    }
    Ok(())
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    #[instrument(skip_all, fields(channel = CHANNEL, alerts = data.alerts.len(), instances = self.receivers.len()))]
    async fn notify(&self, ctx: &CancellationToken, data: &AlertData) -> Vec<NotifyError> {
        if data.is_empty() || self.receivers.is_empty() {
            return Vec::new();
        }

        let chunks = match split_with(data, self.settings.message_max_size, |part| {
            Ok(serde_json::to_string(part)?)
        }) {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(error = %e, "Failed to serialize webhook payload");
                return vec![e];
            }
        };

        let mut group = Group::new(ctx);
        for receiver in &self.receivers {
            let sender = Arc::new(Sender {
                key: credential_key(receiver),
                timeout: self.settings.timeout_for(receiver.timeout_seconds),
                token_expires: receiver
                    .token_expires_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(self.settings.token_expires),
                receiver: receiver.clone(),
                client: self.context.client.clone(),
                tokens: self.context.tokens.clone(),
                secrets: self.context.secrets.clone(),
            });
            for chunk in &chunks {
                let sender = sender.clone();
                let body = chunk.text.clone();
                group.add(async move { sender.deliver(body).await });
            }
        }

        debug!(tasks = group.len(), "Dispatching webhook payloads");
        group.wait().await
    }
}

fn credential_key(receiver: &WebhookReceiver) -> String {
    format!(
        "{} | {}",
        receiver.token_url.as_deref().unwrap_or(&receiver.url),
        receiver.client_id.as_deref().unwrap_or_default()
    )
}

struct Sender {
    receiver: WebhookReceiver,
    key: String,
    timeout: Duration,
    token_expires: Duration,
    client: reqwest::Client,
    tokens: Arc<AccessTokenService>,
    secrets: Arc<dyn SecretResolver>,
}

impl Sender {
    fn refreshable(&self) -> bool {
        self.receiver.token_url.is_some()
    }

    async fn deliver(&self, body: String) -> Result<(), NotifyError> {
        let result = match self.attempt(&body).await {
            Err(e) if e.is_token_expired() => {
                debug!(url = %self.receiver.url, "Retrying webhook with a fresh token");
                self.attempt(&body).await
            }
            other => other,
        };

        match &result {
            Ok(()) => metrics::counter!("notifications_sent_total", "channel" => CHANNEL).increment(1),
            Err(e) => {
                error!(url = %self.receiver.url, error = %e, "Failed to deliver webhook");
                metrics::counter!("notifications_failed_total", "channel" => CHANNEL).increment(1);
            }
        }
        result
    }

    async fn bearer(&self) -> Result<Option<String>, NotifyError> {
        if self.refreshable() {
            let token = self
                .tokens
                .get_token(&self.key, || self.fetch_token())
                .await?;
            return Ok(Some(token));
        }
        match &self.receiver.bearer_token {
            Some(secret) => Ok(Some(
                self.secrets
                    .get_secret_data(&self.receiver.namespace, secret)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    async fn attempt(&self, body: &str) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&self.receiver.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (name, value) in &self.receiver.headers {
            request = request.header(name, value);
        }
        let token = self.bearer().await?;
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }

        let start = Instant::now();
        match http::send(request, self.timeout).await {
            Ok(_) => {
                debug!(
                    url = %self.receiver.url,
                    bytes = body.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Webhook delivered"
                );
                Ok(())
            }
            Err(NotifyError::Status { status, body })
                if status == StatusCode::UNAUTHORIZED && self.refreshable() =>
            {
                if let Some(rejected) = &token {
                    self.tokens.invalidate_token(&self.key, rejected).await;
                }
                metrics::counter!("access_token_invalidations_total", "channel" => CHANNEL)
                    .increment(1);
                Err(NotifyError::TokenExpired {
                    channel: CHANNEL,
                    message: body,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken, NotifyError> {
        let (Some(token_url), Some(client_id), Some(secret_ref)) = (
            self.receiver.token_url.as_deref(),
            self.receiver.client_id.as_deref(),
            self.receiver.client_secret.as_ref(),
        ) else {
            return Err(NotifyError::Config("incomplete client credentials".into()));
        };
        let secret = self
            .secrets
            .get_secret_data(&self.receiver.namespace, secret_ref)
            .await?;

        let request = self.client.post(token_url).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", secret.as_str()),
        ]);
        let body = http::send(request, self.timeout).await?;
        let response: TokenResponse = serde_json::from_str(&body)?;
        if response.access_token.is_empty() {
            return Err(NotifyError::Channel {
                channel: CHANNEL,
                code: -1,
                message: "no access token returned".into(),
            });
        }

        metrics::counter!("access_token_fetches_total", "channel" => CHANNEL).increment(1);
        let lifetime = match response.expires_in {
            Some(seconds) if seconds > 0 => {
                self.token_expires.min(Duration::from_secs(seconds as u64))
            }
            _ => self.token_expires,
        };
        Ok(AccessToken::new(response.access_token, lifetime))
    }
}
