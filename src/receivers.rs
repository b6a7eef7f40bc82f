//! Receiver configuration objects.
//!
//! Receivers arrive already parsed from the configuration store. Each one
//! carries channel-specific transport fields, an optional destination list
//! and an optional tenant tag. Receivers of the same channel whose transport
//! fields are identical are *mergeable*: [`transport_key`] hashes the
//! normalized config (destinations and bookkeeping fields cleared) so the
//! notifiers can collapse them into a single outbound instance.

use crate::error::NotifyError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The channel a receiver delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chatbot,
    Email,
    Webhook,
    Slack,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Chatbot => "chatbot",
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Slack => "slack",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which alerts a receiver applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Applies to every alert group.
    Global,
    /// Applies only to alert groups whose tenant label carries this value.
    Tenant(String),
}

/// A reference to a secret held by the secret store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Enterprise IM application receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatbotReceiver {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub corp_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<SecretRef>,
    #[serde(default, deserialize_with = "destinations")]
    pub to_user: Vec<String>,
    #[serde(default, deserialize_with = "destinations")]
    pub to_party: Vec<String>,
    #[serde(default, deserialize_with = "destinations")]
    pub to_tag: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_seconds: Option<u64>,
}

/// SMTP receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EmailReceiver {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default)]
    pub smart_host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretRef>,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default, deserialize_with = "destinations")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

fn default_smtp_port() -> u16 {
    25
}

/// Generic HTTP webhook receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WebhookReceiver {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Static bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<SecretRef>,
    /// OAuth2 client-credentials endpoint. Takes precedence over `bearer_token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_seconds: Option<u64>,
}

/// Slack bot receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SlackReceiver {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default)]
    pub api_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretRef>,
    #[serde(default, deserialize_with = "destinations")]
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// A receiver of any channel type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Receiver {
    Chatbot(ChatbotReceiver),
    Email(EmailReceiver),
    Webhook(WebhookReceiver),
    Slack(SlackReceiver),
}

impl Receiver {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Receiver::Chatbot(_) => ChannelKind::Chatbot,
            Receiver::Email(_) => ChannelKind::Email,
            Receiver::Webhook(_) => ChannelKind::Webhook,
            Receiver::Slack(_) => ChannelKind::Slack,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Receiver::Chatbot(r) => &r.name,
            Receiver::Email(r) => &r.name,
            Receiver::Webhook(r) => &r.name,
            Receiver::Slack(r) => &r.name,
        }
    }

    pub fn tenant(&self) -> Option<&str> {
        match self {
            Receiver::Chatbot(r) => r.tenant.as_deref(),
            Receiver::Email(r) => r.tenant.as_deref(),
            Receiver::Webhook(r) => r.tenant.as_deref(),
            Receiver::Slack(r) => r.tenant.as_deref(),
        }
        .filter(|t| !t.is_empty())
    }

    pub fn scope(&self) -> Scope {
        match self.tenant() {
            Some(tenant) => Scope::Tenant(tenant.to_string()),
            None => Scope::Global,
        }
    }

    /// A hash of the full receiver, destinations included.
    ///
    /// Two receivers with the same content key are duplicates and deliver
    /// exactly the same requests.
    pub fn content_key(&self) -> Result<String, NotifyError> {
        hash(self)
    }
}

/// Behaviour shared by receivers that can be merged per transport identity.
pub trait Mergeable: Clone + Serialize {
    /// A copy with destinations and bookkeeping fields cleared.
    fn normalized(&self) -> Self;

    /// Appends `other`'s destinations, skipping ones already present.
    fn absorb(&mut self, other: &Self);

    /// True when this receiver has no destinations at all.
    fn has_no_destinations(&self) -> bool;
}

/// Deterministic hash of the normalized receiver.
pub fn transport_key<R: Mergeable>(receiver: &R) -> Result<String, NotifyError> {
    hash(&receiver.normalized())
}

fn hash<T: Serialize>(value: &T) -> Result<String, NotifyError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Collapses receivers sharing a transport identity into one instance each.
///
/// First-seen order is kept, both for instances and for destinations within
/// an instance. Receivers that cannot be hashed are skipped.
pub fn merge<R: Mergeable>(receivers: impl IntoIterator<Item = R>) -> Vec<R> {
    let mut merged: Vec<R> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for receiver in receivers {
        let key = match transport_key(&receiver) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(error = %e, "Failed to compute receiver transport key, skipping");
                continue;
            }
        };
        match index.get(&key) {
            Some(&i) => merged[i].absorb(&receiver),
            None => {
                index.insert(key, merged.len());
                let mut instance = receiver.normalized();
                instance.absorb(&receiver);
                merged.push(instance);
            }
        }
    }

    merged
}

fn extend_unique(target: &mut Vec<String>, source: &[String]) {
    for item in source {
        if !item.is_empty() && !target.contains(item) {
            target.push(item.clone());
        }
    }
}

impl Mergeable for ChatbotReceiver {
    fn normalized(&self) -> Self {
        Self {
            name: String::new(),
            tenant: None,
            to_user: Vec::new(),
            to_party: Vec::new(),
            to_tag: Vec::new(),
            ..self.clone()
        }
    }

    fn absorb(&mut self, other: &Self) {
        extend_unique(&mut self.to_user, &other.to_user);
        extend_unique(&mut self.to_party, &other.to_party);
        extend_unique(&mut self.to_tag, &other.to_tag);
    }

    fn has_no_destinations(&self) -> bool {
        self.to_user.is_empty() && self.to_party.is_empty() && self.to_tag.is_empty()
    }
}

impl Mergeable for EmailReceiver {
    fn normalized(&self) -> Self {
        Self {
            name: String::new(),
            tenant: None,
            to: Vec::new(),
            ..self.clone()
        }
    }

    fn absorb(&mut self, other: &Self) {
        extend_unique(&mut self.to, &other.to);
    }

    fn has_no_destinations(&self) -> bool {
        self.to.is_empty()
    }
}

impl Mergeable for WebhookReceiver {
    fn normalized(&self) -> Self {
        Self {
            name: String::new(),
            tenant: None,
            ..self.clone()
        }
    }

    // The URL is the destination; identical webhooks simply collapse.
    fn absorb(&mut self, _other: &Self) {}

    fn has_no_destinations(&self) -> bool {
        false
    }
}

impl Mergeable for SlackReceiver {
    fn normalized(&self) -> Self {
        Self {
            name: String::new(),
            tenant: None,
            channels: Vec::new(),
            ..self.clone()
        }
    }

    fn absorb(&mut self, other: &Self) {
        extend_unique(&mut self.channels, &other.channels);
    }

    fn has_no_destinations(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Splits a `|`-separated destination string, dropping empty segments.
pub fn split_destinations(joined: &str) -> Vec<String> {
    joined
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Accepts either a list or a `|`-separated string.
fn destinations<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Destinations {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Destinations::deserialize(deserializer)? {
        Destinations::Joined(s) => split_destinations(&s),
        Destinations::List(list) => list
            .iter()
            .flat_map(|s| split_destinations(s))
            .collect(),
    })
}
