//! Process-wide access-token cache with single-flight refresh.
//!
//! Channels that authenticate with short-lived bearer tokens share one
//! [`AccessTokenService`]. A cached, unexpired token is handed to every
//! caller; when the entry is missing, concurrent callers for the same key
//! wait on a single fetch and all receive its result. A failed fetch is not
//! cached, so the next caller tries again. Invalidation names the token that
//! was rejected and leaves a newer entry in place.

use crate::error::NotifyError;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const MAX_CACHED_TOKENS: u64 = 10_000;

static GLOBAL: Lazy<Arc<AccessTokenService>> = Lazy::new(|| Arc::new(AccessTokenService::new()));

/// A token together with how long it stays valid from the moment it is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub lifetime: Duration,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            value: value.into(),
            lifetime,
        }
    }
}

struct TokenExpiry;

impl Expiry<String, AccessToken> for TokenExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &AccessToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }
}

/// Shared token cache keyed by credential identity (e.g. `"corp | agent"`).
pub struct AccessTokenService {
    cache: Cache<String, AccessToken>,
}

impl AccessTokenService {
    /// Creates an empty, independent token cache.
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_TOKENS)
            .expire_after(TokenExpiry)
            .build();
        Self { cache }
    }

    /// The process-wide instance shared by all notifiers.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the cached token for `key`, fetching it with `fetch` if needed.
    ///
    /// `fetch` is only invoked by the one caller that wins the race for an
    /// empty entry; everyone else waits for that caller's result.
    pub async fn get_token<F, Fut>(&self, key: &str, fetch: F) -> Result<String, NotifyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, NotifyError>>,
    {
        let init = async move {
            debug!(key, "Fetching access token");
            fetch().await
        };
        self.cache
            .try_get_with(key.to_string(), init)
            .await
            .map(|token| token.value)
            .map_err(|source| NotifyError::Credential {
                key: key.to_string(),
                source,
            })
    }

    /// Drops the cached token for `key` if it is still `rejected`, so the next
    /// `get_token` refetches.
    ///
    /// When another caller already replaced the rejected token, the newer
    /// entry is kept and the next `get_token` returns it without a fetch.
    pub async fn invalidate_token(&self, key: &str, rejected: &str) {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if entry.value().value == rejected => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        match result {
            CompResult::Removed(_) => debug!(key, "Invalidated access token"),
            _ => debug!(key, "Access token already replaced"),
        }
    }

    #[cfg(test)]
    async fn cached(&self, key: &str) -> Option<String> {
        self.cache.get(key).await.map(|token| token.value)
    }
}

impl Default for AccessTokenService {
    fn default() -> Self {
        Self::new()
    }
}
