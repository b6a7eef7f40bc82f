//! A recording mail transport for testing the email notifier.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tenant_notify::error::NotifyError;
use tenant_notify::notifier::email::{Mail, MailTransport, SmtpSettings};

#[derive(Clone, Debug, Default)]
pub struct RecordingMailTransport {
    pub sent: Arc<Mutex<Vec<(SmtpSettings, Mail)>>>,
    /// Recipients whose mails are rejected.
    pub reject: Vec<String>,
}

impl RecordingMailTransport {
    pub fn rejecting(recipient: &str) -> Self {
        Self {
            reject: vec![recipient.to_string()],
            ..Default::default()
        }
    }

    pub fn mails(&self) -> Vec<Mail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, mail)| mail.clone())
            .collect()
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, server: &SmtpSettings, mail: &Mail) -> Result<(), NotifyError> {
        if mail.to.iter().any(|to| self.reject.contains(to)) {
            return Err(NotifyError::Email("550 mailbox unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((server.clone(), mail.clone()));
        Ok(())
    }
}
