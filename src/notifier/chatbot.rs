//! Enterprise IM application notifier.
//!
//! Messages go through the application message API, which authenticates
//! with a short-lived access token fetched from `gettoken` with the corp id
//! and the application secret. Tokens are cached per `corp | agent` in the
//! shared [`AccessTokenService`]; a send rejected with the token-expired code
//! invalidates the cached token and is retried exactly once.

use super::http::{self, url_with_parameters, url_with_path};
use super::{ChannelSettings, NotifierContext};
use crate::batch::lockstep;
use crate::core::{AlertData, Notifier};
use crate::error::NotifyError;
use crate::group::Group;
use crate::receivers::{merge, ChannelKind, ChatbotReceiver};
use crate::secrets::SecretResolver;
use crate::template::{MessageChunk, DEFAULT_TEXT};
use crate::token::{AccessToken, AccessTokenService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_API_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const MESSAGE_MAX_SIZE: usize = 2048;
pub const DEFAULT_TOKEN_EXPIRES: Duration = Duration::from_secs(2 * 60 * 60);

pub const USER_BATCH_SIZE: usize = 1000;
pub const PARTY_BATCH_SIZE: usize = 100;
pub const TAG_BATCH_SIZE: usize = 100;

const CODE_OK: i64 = 0;
const CODE_TOKEN_EXPIRED: i64 = 42001;

const CHANNEL: &str = "chatbot";

/// Built-in settings before channel options are applied.
pub fn default_settings() -> ChannelSettings {
    ChannelSettings {
        timeout: DEFAULT_TIMEOUT,
        template: DEFAULT_TEXT.to_string(),
        message_max_size: MESSAGE_MAX_SIZE,
        token_expires: DEFAULT_TOKEN_EXPIRES,
    }
}

/// The credential cache key for an application.
pub fn credential_key(receiver: &ChatbotReceiver) -> String {
    format!("{} | {}", receiver.corp_id, receiver.agent_id)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct TextContent {
    content: String,
}

/// Request body of `message/send`.
#[derive(Debug, Clone, Serialize, PartialEq)]
struct ChatbotMessage {
    #[serde(skip_serializing_if = "String::is_empty")]
    touser: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    toparty: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    totag: String,
    agentid: String,
    msgtype: &'static str,
    safe: &'static str,
    text: TextContent,
}

#[derive(Debug, Deserialize)]
struct ChatbotResponse {
    #[serde(default, alias = "code")]
    errcode: Option<i64>,
    #[serde(default, alias = "error")]
    errmsg: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default, alias = "code")]
    errcode: i64,
    #[serde(default, alias = "error")]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Sends alert data to every merged IM application instance.
pub struct ChatbotNotifier {
    receivers: Vec<ChatbotReceiver>,
    settings: ChannelSettings,
    context: NotifierContext,
}

impl ChatbotNotifier {
    /// Builds the notifier, dropping receivers that cannot authenticate.
    ///
    /// Receivers sharing an application (same corp, agent, secret and
    /// endpoint) are merged into one instance.
    pub fn new(
        receivers: impl IntoIterator<Item = ChatbotReceiver>,
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
                    warn!(receiver = %receiver.name, reason, "Dropping chatbot receiver");
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

    /// The merged receiver instances this notifier delivers to.
    pub fn receivers(&self) -> &[ChatbotReceiver] {
        &self.receivers
    }

    fn sender(&self, receiver: &ChatbotReceiver) -> Arc<Sender> {
        Arc::new(Sender {
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
        })
    }
}

fn validate(receiver: &ChatbotReceiver) -> Result<(), &'static str> {
    if receiver.corp_id.is_empty() {
        return Err("missing corp id");
    }
    if receiver.agent_id.is_empty() {
        return Err("missing agent id");
    }
    match &receiver.api_secret {
        Some(secret) if !secret.name.is_empty() => {}
        _ => return Err("missing api secret"),
    }
    if url::Url::parse(&receiver.api_url).is_err() {
        return Err("invalid api url");
    }
    Ok(())
}

fn batch_size(receiver: &ChatbotReceiver, limit: usize) -> usize {
    receiver.batch_size.map_or(limit, |size| size.clamp(1, limit))
}

#[async_trait]
impl Notifier for ChatbotNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Chatbot
    }

    #[instrument(skip_all, fields(channel = CHANNEL, alerts = data.alerts.len(), instances = self.receivers.len()))]
    async fn notify(&self, ctx: &CancellationToken, data: &AlertData) -> Vec<NotifyError> {
        if data.is_empty() {
            return Vec::new();
        }

        // Everything is rendered up front so a template error sends nothing.
        let mut rendered: Vec<(&ChatbotReceiver, Vec<MessageChunk>)> = Vec::new();
        for receiver in &self.receivers {
            let template = self.settings.template_for(receiver.template.as_deref());
            match self
                .context
                .templates
                .split(data, self.settings.message_max_size, template)
            {
                Ok(chunks) => rendered.push((receiver, chunks)),
                Err(e) => {
                    error!(error = %e, template, "Failed to render chatbot message");
                    return vec![e];
                }
            }
        }

        let mut group = Group::new(ctx);
        for (receiver, chunks) in rendered {
            let sender = self.sender(receiver);
            let rounds = lockstep(
                [&receiver.to_user[..], &receiver.to_party[..], &receiver.to_tag[..]],
                [
                    batch_size(receiver, USER_BATCH_SIZE),
                    batch_size(receiver, PARTY_BATCH_SIZE),
                    batch_size(receiver, TAG_BATCH_SIZE),
                ],
            );
            for [users, parties, tags] in rounds {
                for chunk in &chunks {
                    let message = ChatbotMessage {
                        touser: users.join("|"),
                        toparty: parties.join("|"),
                        totag: tags.join("|"),
                        agentid: receiver.agent_id.clone(),
                        msgtype: "text",
                        safe: "0",
                        text: TextContent {
                            content: chunk.text.clone(),
                        },
                    };
                    let sender = sender.clone();
                    group.add(async move { sender.deliver(&message).await });
                }
            }
        }

        debug!(tasks = group.len(), "Dispatching chatbot messages");
        group.wait().await
    }
}

/// Everything one send task needs, shared by the tasks of an instance.
struct Sender {
    receiver: ChatbotReceiver,
    key: String,
    timeout: Duration,
    token_expires: Duration,
    client: reqwest::Client,
    tokens: Arc<AccessTokenService>,
    secrets: Arc<dyn SecretResolver>,
}

impl Sender {
    async fn deliver(&self, message: &ChatbotMessage) -> Result<(), NotifyError> {
        let result = match self.attempt(message).await {
            Err(e) if e.is_token_expired() => {
                debug!(key = %self.key, "Retrying chatbot message with a fresh token");
                self.attempt(message).await
            }
            other => other,
        };

        match &result {
            Ok(()) => metrics::counter!("notifications_sent_total", "channel" => CHANNEL).increment(1),
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to send chatbot message");
                metrics::counter!("notifications_failed_total", "channel" => CHANNEL).increment(1);
            }
        }
        result
    }

    /// One send. On the token-expired code the rejected token is invalidated
    /// before returning, so a following attempt never reuses it.
    async fn attempt(&self, message: &ChatbotMessage) -> Result<(), NotifyError> {
        let token = self
            .tokens
            .get_token(&self.key, || self.fetch_token())
            .await?;

        let url = url_with_parameters(
            url_with_path(&self.receiver.api_url, "message/send")?,
            [("access_token", token.as_str())],
        );
        let start = Instant::now();
        let body = http::send(self.client.post(url).json(message), self.timeout).await?;
        let response: ChatbotResponse = serde_json::from_str(&body)?;
        debug!(
            key = %self.key,
            code = ?response.errcode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chatbot message sent"
        );

        match response.errcode {
            Some(CODE_OK) => Ok(()),
            Some(CODE_TOKEN_EXPIRED) => {
                self.tokens.invalidate_token(&self.key, &token).await;
                metrics::counter!("access_token_invalidations_total", "channel" => CHANNEL)
                    .increment(1);
                Err(NotifyError::TokenExpired {
                    channel: CHANNEL,
                    message: response.errmsg,
                })
            }
            Some(code) => Err(NotifyError::Channel {
                channel: CHANNEL,
                code,
                message: response.errmsg,
            }),
            None => Err(NotifyError::Channel {
                channel: CHANNEL,
                code: -1,
                message: format!("reply without an error code: {body}"),
            }),
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken, NotifyError> {
        let secret_ref = self
            .receiver
            .api_secret
            .as_ref()
            .ok_or_else(|| NotifyError::Config("missing api secret".into()))?;
        let secret = self
            .secrets
            .get_secret_data(&self.receiver.namespace, secret_ref)
            .await?;

        let url = url_with_parameters(
            url_with_path(&self.receiver.api_url, "gettoken")?,
            [
                ("corpid", self.receiver.corp_id.as_str()),
                ("corpsecret", secret.as_str()),
            ],
        );
        let body = http::send(self.client.get(url), self.timeout).await?;
        let response: TokenResponse = serde_json::from_str(&body)?;
        if response.errcode != CODE_OK || response.access_token.is_empty() {
            return Err(NotifyError::Channel {
                channel: CHANNEL,
                code: response.errcode,
                message: if response.errmsg.is_empty() {
                    "no access token returned".to_string()
                } else {
                    response.errmsg
                },
            });
        }

        metrics::counter!("access_token_fetches_total", "channel" => CHANNEL).increment(1);
        Ok(AccessToken::new(
            response.access_token,
            token_lifetime(response.expires_in, self.token_expires),
        ))
    }
}

fn token_lifetime(expires_in: Option<i64>, configured: Duration) -> Duration {
    match expires_in {
        Some(seconds) if seconds > 0 => configured.min(Duration::from_secs(seconds as u64)),
        _ => configured,
    }
}
