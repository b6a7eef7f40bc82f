//! Configuration management for tenant-notify
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, a TOML file, environment
//! variables and command-line arguments, in that order.

use crate::cli::Cli;
use crate::receivers::Receiver;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// The label whose value identifies the tenant an alert group belongs to.
    pub tenant_label: String,
    /// Template files and the global template override.
    #[serde(default)]
    pub templates: TemplateConfig,
    /// Channel-wide option overrides.
    #[serde(default)]
    pub options: ReceiverOptions,
    /// Secrets by namespace, then by name (or `name/key`).
    #[serde(default)]
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    /// Global and tenant receivers.
    #[serde(default)]
    pub receivers: Vec<Receiver>,
}

/// Template sources.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct TemplateConfig {
    /// Template files, registered under their file name.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Template used by every channel that has no template of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Per-channel option overrides.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct ReceiverOptions {
    #[serde(default)]
    pub chatbot: ChannelOptions,
    #[serde(default)]
    pub email: ChannelOptions,
    #[serde(default)]
    pub webhook: ChannelOptions,
    #[serde(default)]
    pub slack: ChannelOptions,
}

/// Options applied to every receiver of one channel type.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct ChannelOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_max_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_seconds: Option<u64>,
}

impl Config {
    /// Loads the configuration, layering defaults, file, environment and CLI.
    ///
    /// Environment variables use the `TENANT_NOTIFY_` prefix with `__` as the
    /// nesting separator, e.g. `TENANT_NOTIFY_OPTIONS__CHATBOT__TIMEOUT_SECONDS=5`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("TENANT_NOTIFY_").split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tenant_label: "user".to_string(),
            templates: TemplateConfig::default(),
            options: ReceiverOptions::default(),
            secrets: BTreeMap::new(),
            receivers: Vec::new(),
        }
    }
}
