//! Selects the receivers that apply to an alert group.

use crate::core::AlertData;
use crate::receivers::{Receiver, Scope};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Holds the global and tenant receivers and picks those for an alert group.
#[derive(Debug, Clone, Default)]
pub struct ReceiverResolver {
    receivers: Vec<Receiver>,
}

impl ReceiverResolver {
    pub fn new(receivers: Vec<Receiver>) -> Self {
        Self { receivers }
    }

    /// Returns the global receivers plus those of the group's tenant.
    ///
    /// The tenant is the value of the `tenant_key` label shared by the whole
    /// group. Without one only global receivers apply. Receivers that are
    /// identical in every field are returned once. An empty result is a valid
    /// outcome: nobody is subscribed.
    pub fn resolve(&self, tenant_key: &str, data: &AlertData) -> Vec<Receiver> {
        let tenant = data.label(tenant_key).filter(|t| !t.is_empty());
        let mut seen = HashSet::new();

        let resolved: Vec<Receiver> = self
            .receivers
            .iter()
            .filter(|receiver| match receiver.scope() {
                Scope::Global => true,
                Scope::Tenant(t) => Some(t.as_str()) == tenant,
            })
            .filter(|receiver| match receiver.content_key() {
                Ok(key) => seen.insert(key),
                Err(e) => {
                    warn!(receiver = %receiver.name(), error = %e, "Skipping receiver that cannot be hashed");
                    false
                }
            })
            .cloned()
            .collect();

        debug!(
            tenant = tenant.unwrap_or(""),
            receivers = resolved.len(),
            "Resolved receivers"
        );
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Alert, AlertStatus};
    use crate::receivers::{ChatbotReceiver, SlackReceiver, WebhookReceiver};

    fn chatbot(tenant: Option<&str>, user: &str) -> Receiver {
        Receiver::Chatbot(ChatbotReceiver {
            name: format!("{}-{user}", tenant.unwrap_or("global")),
            tenant: tenant.map(String::from),
            corp_id: "corp".into(),
            agent_id: "1".into(),
            to_user: vec![user.into()],
            ..Default::default()
        })
    }

    fn data_for(user: Option<&str>) -> AlertData {
        let mut alert = Alert::new(AlertStatus::Firing).with_label("alertname", "CPUHigh");
        if let Some(user) = user {
            alert = alert.with_label("user", user);
        }
        AlertData::from_alerts(vec![alert])
    }

    fn resolver() -> ReceiverResolver {
        ReceiverResolver::new(vec![
            chatbot(None, "ops"),
            chatbot(Some("alice"), "a"),
            chatbot(Some("bob"), "b"),
            Receiver::Webhook(WebhookReceiver {
                url: "http://hooks.local".into(),
                ..Default::default()
            }),
        ])
    }

    fn names(receivers: &[Receiver]) -> Vec<&str> {
        receivers.iter().map(Receiver::name).collect()
    }

    #[test]
    fn test_tenant_receivers_join_global_ones() {
        let resolved = resolver().resolve("user", &data_for(Some("alice")));
        assert_eq!(names(&resolved), vec!["global-ops", "alice-a", ""]);
    }

    #[test]
    fn test_without_tenant_label_only_global_apply() {
        let resolved = resolver().resolve("user", &data_for(None));
        assert_eq!(names(&resolved), vec!["global-ops", ""]);
    }

    #[test]
    fn test_unknown_tenant_gets_only_global() {
        let resolved = resolver().resolve("user", &data_for(Some("mallory")));
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_custom_tenant_label() {
        let mut data = data_for(None);
        data.common_labels.insert("namespace".into(), "bob".into());
        let resolved = resolver().resolve("namespace", &data);
        assert_eq!(names(&resolved), vec!["global-ops", "bob-b", ""]);
    }

    #[test]
    fn test_identical_receivers_are_returned_once() {
        let slack = Receiver::Slack(SlackReceiver {
            channels: vec!["#ops".into()],
            ..Default::default()
        });
        let resolver = ReceiverResolver::new(vec![slack.clone(), slack]);
        assert_eq!(resolver.resolve("user", &data_for(None)).len(), 1);
    }

    #[test]
    fn test_no_receivers_is_not_an_error() {
        let resolved = ReceiverResolver::default().resolve("user", &data_for(Some("alice")));
        assert!(resolved.is_empty());
    }
}
