#![allow(dead_code)]

pub mod mock_mail;

use std::sync::Arc;
use tenant_notify::core::{Alert, AlertData, AlertStatus};
use tenant_notify::notifier::NotifierContext;
use tenant_notify::receivers::{ChatbotReceiver, SecretRef};
use tenant_notify::secrets::StaticSecrets;
use tenant_notify::template::TemplateEngine;
use tenant_notify::token::AccessTokenService;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CORP_ID: &str = "corp";
pub const AGENT_ID: &str = "1000002";
pub const IM_SECRET: &str = "im-s3cr3t";

/// An alert group of `n` firing alerts owned by `user`.
pub fn alert_data(user: &str, n: usize) -> AlertData {
    let alerts = (0..n)
        .map(|i| {
            Alert::new(AlertStatus::Firing)
                .with_label("alertname", format!("Alert{i}"))
                .with_label("user", user)
                .with_annotation("message", format!("alert {i} for {user}"))
        })
        .collect();
    AlertData::from_alerts(alerts)
}

/// The secrets every helper receiver refers to.
pub fn secrets() -> StaticSecrets {
    StaticSecrets::default()
        .with_secret("default", "im-secret", IM_SECRET)
        .with_secret("default", "slack-bot", "xoxb-test")
        .with_secret("default", "oauth", "client-s3cr3t")
        .with_secret("default", "hook-token", "static-token")
        .with_secret("default", "smtp/password", "hunter2")
}

/// A notifier context with its own token cache, so tests never share tokens.
pub fn context() -> NotifierContext {
    NotifierContext::new(
        Arc::new(TemplateEngine::new(&[]).expect("built-in templates should load")),
        Arc::new(secrets()),
    )
    .with_tokens(Arc::new(AccessTokenService::new()))
}

pub fn chatbot_receiver(server: &MockServer, tenant: &str, users: &[&str]) -> ChatbotReceiver {
    ChatbotReceiver {
        name: format!("{tenant}-im"),
        namespace: "default".into(),
        tenant: Some(tenant.into()),
        api_url: format!("{}/cgi-bin/", server.uri()),
        corp_id: CORP_ID.into(),
        agent_id: AGENT_ID.into(),
        api_secret: Some(SecretRef::new("im-secret")),
        to_user: users.iter().map(|u| u.to_string()).collect(),
        ..Default::default()
    }
}

/// Mounts a `gettoken` endpoint handing out `token`, expecting `calls` fetches.
pub async fn mount_gettoken(server: &MockServer, token: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/cgi-bin/gettoken"))
        .and(query_param("corpid", CORP_ID))
        .and(query_param("corpsecret", IM_SECRET))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "errcode": 0,
            "errmsg": "ok",
            "access_token": token,
            "expires_in": 7200
        })))
        .expect(calls)
        .mount(server)
        .await;
}

/// Requests received on `path`, in arrival order, as JSON bodies.
pub async fn json_bodies(server: &MockServer, request_path: &str) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .map(|r| serde_json::from_slice(&r.body).expect("request body should be JSON"))
        .collect()
}
