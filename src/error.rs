//! Error types shared by every stage of a dispatch.
//!
//! Errors are collected per outbound request and handed back to the caller
//! as a list; nothing here aborts sibling deliveries.

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// A receiver is missing transport fields or carries invalid values.
    #[error("invalid receiver configuration: {0}")]
    Config(String),

    #[error("failed to resolve secret {namespace}/{name}: {reason}")]
    Secret {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    /// The credential endpoint could not produce a token. Every caller that
    /// waited on the same fetch receives the same underlying error.
    #[error("failed to acquire access token for {key}")]
    Credential {
        key: String,
        #[source]
        source: Arc<NotifyError>,
    },

    /// The channel rejected the supplied token. Triggers the single retry.
    #[error("{channel} rejected the access token: {message}")]
    TokenExpired {
        channel: &'static str,
        message: String,
    },

    #[error("{channel} returned error {code}: {message}")]
    Channel {
        channel: &'static str,
        code: i64,
        message: String,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("notification cancelled")]
    Cancelled,

    #[error("dispatch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl NotifyError {
    /// Returns `true` if the error was produced by cancelling the dispatch context.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NotifyError::Cancelled)
    }

    /// Returns `true` if the channel signalled an expired or invalid token.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, NotifyError::TokenExpired { .. })
    }
}
