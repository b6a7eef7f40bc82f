//! Secret resolution by reference.
//!
//! The secret store itself lives outside this crate; notifiers only see the
//! [`SecretResolver`] trait. [`StaticSecrets`] backs it with an in-memory map
//! loaded from configuration, which is what the binary and tests use.

use crate::error::NotifyError;
use crate::receivers::SecretRef;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Resolves a secret reference to its plaintext value.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn get_secret_data(&self, namespace: &str, secret: &SecretRef)
        -> Result<String, NotifyError>;
}

/// Secrets keyed by namespace, then by `name` or `name/key`.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    data: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticSecrets {
    pub fn new(data: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { data }
    }

    /// Adds a secret, returning the store for chaining.
    pub fn with_secret(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.data
            .entry(namespace.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn get_secret_data(
        &self,
        namespace: &str,
        secret: &SecretRef,
    ) -> Result<String, NotifyError> {
        let lookup = match &secret.key {
            Some(key) => format!("{}/{}", secret.name, key),
            None => secret.name.clone(),
        };
        self.data
            .get(namespace)
            .and_then(|secrets| secrets.get(&lookup))
            .cloned()
            .ok_or_else(|| NotifyError::Secret {
                namespace: namespace.to_string(),
                name: lookup,
                reason: "not found".to_string(),
            })
    }
}
