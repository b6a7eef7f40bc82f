use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;
use tenant_notify::cli::Cli;
use tenant_notify::config::Config;
use tenant_notify::receivers::{Receiver, Scope};

const CONFIG: &str = r#"
    log_level = "debug"
    tenant_label = "namespace"

    [templates]
    files = ["/etc/tenant-notify/chat.tmpl"]
    name = "chat.tmpl"

    [options.chatbot]
    timeout_seconds = 5
    message_max_size = 1024

    [secrets.default]
    im-secret = "s3cr3t"

    [[receivers]]
    type = "chatbot"
    name = "alice-im"
    tenant = "alice"
    corp_id = "corp"
    agent_id = "1000002"
    api_secret = { name = "im-secret" }
    to_user = "a|b"

    [[receivers]]
    type = "webhook"
    name = "global-hook"
    url = "http://hooks.local/alerts"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let file = write_config(CONFIG);
    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        ..Default::default()
    };

    let config = Config::load(&cli).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.tenant_label, "namespace");
    assert_eq!(config.templates.name.as_deref(), Some("chat.tmpl"));
    assert_eq!(config.options.chatbot.timeout_seconds, Some(5));
    assert_eq!(config.options.chatbot.message_max_size, Some(1024));
    assert_eq!(config.options.email.timeout_seconds, None);
    assert_eq!(config.secrets["default"]["im-secret"], "s3cr3t");

    assert_eq!(config.receivers.len(), 2);
    let Receiver::Chatbot(im) = &config.receivers[0] else {
        panic!("expected a chatbot receiver");
    };
    assert_eq!(im.to_user, vec!["a", "b"]);
    assert_eq!(config.receivers[0].scope(), Scope::Tenant("alice".into()));
    assert_eq!(config.receivers[1].scope(), Scope::Global);
}

#[test]
#[serial]
fn test_defaults_without_config_file() {
    let config = Config::load(&Cli::default()).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.log_level, "info");
    assert_eq!(config.tenant_label, "user");
}

#[test]
#[serial]
fn test_cli_overrides_file() {
    let file = write_config(CONFIG);
    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        log_level: Some("trace".into()),
        tenant_label: Some("tenant".into()),
        ..Default::default()
    };

    let config = Config::load(&cli).unwrap();

    assert_eq!(config.log_level, "trace");
    assert_eq!(config.tenant_label, "tenant");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(CONFIG);
    std::env::set_var("TENANT_NOTIFY_OPTIONS__CHATBOT__TIMEOUT_SECONDS", "9");
    std::env::set_var("TENANT_NOTIFY_TENANT_LABEL", "team");

    let result = Config::load(&Cli {
        config: Some(file.path().to_path_buf()),
        ..Default::default()
    });

    std::env::remove_var("TENANT_NOTIFY_OPTIONS__CHATBOT__TIMEOUT_SECONDS");
    std::env::remove_var("TENANT_NOTIFY_TENANT_LABEL");

    let config = result.unwrap();
    assert_eq!(config.options.chatbot.timeout_seconds, Some(9));
    assert_eq!(config.tenant_label, "team");
}

#[test]
#[serial]
fn test_unknown_receiver_type_is_rejected() {
    let file = write_config(
        r#"
        [[receivers]]
        type = "carrier-pigeon"
        name = "coo"
        "#,
    );
    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        ..Default::default()
    };

    assert!(Config::load(&cli).is_err());
}
