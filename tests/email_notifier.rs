mod helpers;

use helpers::mock_mail::RecordingMailTransport;
use helpers::{alert_data, context};
use std::sync::Arc;
use tenant_notify::core::Notifier;
use tenant_notify::error::NotifyError;
use tenant_notify::notifier::email::{self, EmailNotifier};
use tenant_notify::receivers::{EmailReceiver, SecretRef};
use tokio_util::sync::CancellationToken;

fn email_receiver(tenant: &str, to: &[&str]) -> EmailReceiver {
    EmailReceiver {
        name: format!("{tenant}-mail"),
        namespace: "default".into(),
        tenant: Some(tenant.into()),
        smart_host: "smtp.example.com".into(),
        port: 587,
        from: "alerts@example.com".into(),
        username: Some("alerts".into()),
        password: Some(SecretRef {
            name: "smtp".into(),
            key: Some("password".into()),
        }),
        starttls: true,
        to: to.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_merged_recipients_share_one_mail() {
    let transport = RecordingMailTransport::default();
    let notifier = EmailNotifier::new(
        vec![
            email_receiver("alice", &["alice@example.com"]),
            email_receiver("bob", &["bob@example.com", "alice@example.com"]),
        ],
        email::default_settings(),
        context(),
        Arc::new(transport.clone()),
    );

    let errors = notifier
        .notify(&CancellationToken::new(), &alert_data("alice", 2))
        .await;

    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    let mails = transport.mails();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, vec!["alice@example.com", "bob@example.com"]);
    assert_eq!(mails[0].subject, "[FIRING:2]");
    assert!(mails[0].html.contains("alert 1 for alice"));

    let (server, _) = transport.sent.lock().unwrap()[0].clone();
    assert_eq!(server.host, "smtp.example.com");
    assert_eq!(server.port, 587);
    assert_eq!(server.password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_recipients_are_batched() {
    let transport = RecordingMailTransport::default();
    let recipients: Vec<String> = (0..5).map(|i| format!("user{i}@example.com")).collect();
    let refs: Vec<&str> = recipients.iter().map(String::as_str).collect();
    let mut receiver = email_receiver("alice", &refs);
    receiver.batch_size = Some(2);
    let notifier = EmailNotifier::new(
        vec![receiver],
        email::default_settings(),
        context(),
        Arc::new(transport.clone()),
    );

    let errors = notifier
        .notify(&CancellationToken::new(), &alert_data("alice", 1))
        .await;

    assert!(errors.is_empty());
    let mut sizes: Vec<usize> = transport.mails().iter().map(|m| m.to.len()).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 2, 2]);
}

#[tokio::test]
async fn test_rejected_batch_does_not_block_others() {
    let transport = RecordingMailTransport::rejecting("bounce@example.com");
    let mut receiver = email_receiver("alice", &["bounce@example.com", "ok@example.com"]);
    receiver.batch_size = Some(1);
    let notifier = EmailNotifier::new(
        vec![receiver],
        email::default_settings(),
        context(),
        Arc::new(transport.clone()),
    );

    let errors = notifier
        .notify(&CancellationToken::new(), &alert_data("alice", 1))
        .await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], NotifyError::Email(_)));
    assert_eq!(transport.mails().len(), 1);
    assert_eq!(transport.mails()[0].to, vec!["ok@example.com"]);
}

#[tokio::test]
async fn test_unresolved_password_skips_the_receiver() {
    let transport = RecordingMailTransport::default();
    let mut broken = email_receiver("alice", &["alice@example.com"]);
    broken.smart_host = "smtp.broken.example.com".into();
    broken.password = Some(SecretRef::new("missing"));
    let notifier = EmailNotifier::new(
        vec![broken, email_receiver("bob", &["bob@example.com"])],
        email::default_settings(),
        context(),
        Arc::new(transport.clone()),
    );

    let errors = notifier
        .notify(&CancellationToken::new(), &alert_data("bob", 1))
        .await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], NotifyError::Secret { .. }));
    assert_eq!(transport.mails().len(), 1);
    assert_eq!(transport.mails()[0].to, vec!["bob@example.com"]);
}
