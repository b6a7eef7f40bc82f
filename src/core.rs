//! Core domain types and service traits for tenant-notify
//!
//! This module defines the alert-data model consumed by templating and the
//! uniform contract every channel notifier implements.

use crate::error::NotifyError;
use crate::receivers::ChannelKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use tokio_util::sync::CancellationToken;

/// Whether an alert is currently firing or has been resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

/// A single alert record as delivered by the alerting pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

impl Alert {
    /// Creates an alert with the given status and no labels.
    pub fn new(status: AlertStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Adds a label, returning the alert for chaining.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation, returning the alert for chaining.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// An ordered group of alerts plus the labels shared by the whole group.
///
/// Field names serialize in camelCase so templates read like the upstream
/// webhook payload (`commonLabels`, `groupLabels`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertData {
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_url: String,
}

impl AlertData {
    /// Builds a group from a list of alerts, deriving status and common labels.
    pub fn from_alerts(alerts: Vec<Alert>) -> Self {
        let common_labels = common_entries(alerts.iter().map(|a| &a.labels));
        let common_annotations = common_entries(alerts.iter().map(|a| &a.annotations));
        Self {
            status: group_status(&alerts),
            alerts,
            common_labels,
            common_annotations,
            ..Default::default()
        }
    }

    /// Returns a copy covering only `alerts[range]`.
    ///
    /// Group-level context (receiver, group and common labels, external URL)
    /// is carried over unchanged; the status is recomputed for the subset.
    pub fn slice(&self, range: Range<usize>) -> AlertData {
        let alerts = self.alerts[range].to_vec();
        AlertData {
            receiver: self.receiver.clone(),
            status: group_status(&alerts),
            alerts,
            group_labels: self.group_labels.clone(),
            common_labels: self.common_labels.clone(),
            common_annotations: self.common_annotations.clone(),
            external_url: self.external_url.clone(),
        }
    }

    /// Looks up a group-level label.
    ///
    /// Common labels win; otherwise the label is returned only when every
    /// alert in the group carries the same value for it.
    pub fn label(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.common_labels.get(name) {
            return Some(value.as_str());
        }
        let mut values = self.alerts.iter().map(|a| a.labels.get(name));
        let first = values.next()??;
        values
            .all(|v| v == Some(first))
            .then_some(first.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

fn group_status(alerts: &[Alert]) -> AlertStatus {
    if alerts.iter().any(|a| a.status == AlertStatus::Firing) {
        AlertStatus::Firing
    } else {
        AlertStatus::Resolved
    }
}

fn common_entries<'a>(
    mut maps: impl Iterator<Item = &'a BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let Some(first) = maps.next() else {
        return BTreeMap::new();
    };
    let mut common = first.clone();
    for map in maps {
        common.retain(|k, v| map.get(k) == Some(v));
    }
    common
}

// =============================================================================
// Service Traits
// =============================================================================

/// Delivers alert data through one channel type.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The channel this notifier delivers to. Used for logging and metrics.
    fn channel(&self) -> ChannelKind;

    /// Sends `data` to every destination this notifier was built with.
    ///
    /// # Returns
    /// Every error encountered, one per failed request. An empty list means
    /// all deliveries succeeded; a non-empty list is a partial failure.
    async fn notify(&self, ctx: &CancellationToken, data: &AlertData) -> Vec<NotifyError>;
}
