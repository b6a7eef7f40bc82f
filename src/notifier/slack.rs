//! Slack bot notifier.
//!
//! Posts rendered text through `chat.postMessage` with a static bot token,
//! one request per channel and message chunk.

use super::http::{self, url_with_path};
use super::{ChannelSettings, NotifierContext};
use crate::core::{AlertData, Notifier};
use crate::error::NotifyError;
use crate::group::Group;
use crate::receivers::{merge, ChannelKind, SlackReceiver};
use crate::secrets::SecretResolver;
use crate::template::{MessageChunk, DEFAULT_TEXT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_API_URL: &str = "https://slack.com/api/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MESSAGE_MAX_SIZE: usize = 4000;

const CHANNEL: &str = "slack";

/// Built-in settings before channel options are applied.
pub fn default_settings() -> ChannelSettings {
    ChannelSettings {
        timeout: DEFAULT_TIMEOUT,
        template: DEFAULT_TEXT.to_string(),
        message_max_size: MESSAGE_MAX_SIZE,
        token_expires: Duration::ZERO,
    }
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: String,
}

/// Sends alert data to Slack channels.
pub struct SlackNotifier {
    receivers: Vec<SlackReceiver>,
    settings: ChannelSettings,
    context: NotifierContext,
}

impl SlackNotifier {
    pub fn new(
        receivers: impl IntoIterator<Item = SlackReceiver>,
        settings: ChannelSettings,
        context: NotifierContext,
    ) -> Self {
        let valid = receivers.into_iter().filter_map(|mut receiver| {
            if receiver.api_url.is_empty() {
                receiver.api_url = DEFAULT_API_URL.to_string();
            }
            match validate(&receiver) {
                Ok(()) => Some(receiver),
                Err(reason) => {
                    warn!(receiver = %receiver.name, reason, "Dropping slack receiver");
                    None
                }
            }
        });

        Self {
            receivers: merge(valid),
            settings,
            context,
        }
    }

    pub fn receivers(&self) -> &[SlackReceiver] {
        &self.receivers
    }
}

fn validate(receiver: &SlackReceiver) -> Result<(), &'static str> {
    match &receiver.token {
        Some(token) if !token.name.is_empty() => {}
        _ => return Err("missing bot token"),
    }
    if url::Url::parse(&receiver.api_url).is_err() {
        return Err("invalid api url");
    }
    Ok(())
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    #[instrument(skip_all, fields(channel = CHANNEL, alerts = data.alerts.len(), instances = self.receivers.len()))]
    async fn notify(&self, ctx: &CancellationToken, data: &AlertData) -> Vec<NotifyError> {
        if data.is_empty() {
            return Vec::new();
        }

        let mut rendered: Vec<(&SlackReceiver, Vec<MessageChunk>)> = Vec::new();
        for receiver in &self.receivers {
            let template = self.settings.template_for(receiver.template.as_deref());
            match self
                .context
                .templates
                .split(data, self.settings.message_max_size, template)
            {
                Ok(chunks) => rendered.push((receiver, chunks)),
                Err(e) => {
                    error!(error = %e, template, "Failed to render slack message");
                    return vec![e];
                }
            }
        }

        let mut group = Group::new(ctx);
        for (receiver, chunks) in rendered {
            let sender = Arc::new(Sender {
                receiver: receiver.clone(),
                timeout: self.settings.timeout_for(receiver.timeout_seconds),
                client: self.context.client.clone(),
                secrets: self.context.secrets.clone(),
            });
            for channel in &receiver.channels {
                for chunk in &chunks {
                    let sender = sender.clone();
                    let channel = channel.clone();
                    let text = chunk.text.clone();
                    group.add(async move { sender.deliver(&channel, &text).await });
                }
            }
        }

        debug!(tasks = group.len(), "Dispatching slack messages");
        group.wait().await
    }
}

struct Sender {
    receiver: SlackReceiver,
    timeout: Duration,
    client: reqwest::Client,
    secrets: Arc<dyn SecretResolver>,
}

impl Sender {
    async fn deliver(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        let result = self.post(channel, text).await;
        match &result {
            Ok(()) => metrics::counter!("notifications_sent_total", "channel" => CHANNEL).increment(1),
            Err(e) => {
                error!(slack_channel = channel, error = %e, "Failed to send slack message");
                metrics::counter!("notifications_failed_total", "channel" => CHANNEL).increment(1);
            }
        }
        result
    }

    async fn post(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        let secret = self
            .receiver
            .token
            .as_ref()
            .ok_or_else(|| NotifyError::Config("missing bot token".into()))?;
        let token = self
            .secrets
            .get_secret_data(&self.receiver.namespace, secret)
            .await?;

        let url = url_with_path(&self.receiver.api_url, "chat.postMessage")?;
        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&PostMessage { channel, text });

        let start = Instant::now();
        let body = http::send(request, self.timeout).await?;
        let response: PostMessageResponse = serde_json::from_str(&body)?;
        debug!(
            slack_channel = channel,
            ok = response.ok,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Slack message posted"
        );

        if response.ok {
            Ok(())
        } else {
            Err(NotifyError::Channel {
                channel: CHANNEL,
                code: 0,
                message: response.error,
            })
        }
    }
}
