//! tenant-notify - Multi-tenant alert notification dispatcher
//!
//! Loads the receiver configuration, reads one alert group and delivers it
//! to every subscribed channel. Exits non-zero if any delivery failed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Read;
use std::sync::Arc;
use tenant_notify::{
    cli::Cli, config::Config, dispatch::Dispatcher, notifier::describe_metrics,
    secrets::StaticSecrets, AlertData,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).context("failed to load configuration")?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    describe_metrics();

    info!(
        receivers = config.receivers.len(),
        tenant_label = %config.tenant_label,
        "tenant-notify starting up"
    );

    let raw = match &cli.alerts {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read alerts from {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read alerts from stdin")?;
            raw
        }
    };
    let data: AlertData = serde_json::from_str(&raw).context("failed to parse alert group")?;

    let secrets = Arc::new(StaticSecrets::new(config.secrets.clone()));
    let dispatcher = Dispatcher::new(&config, secrets).context("failed to build dispatcher")?;

    let ctx = CancellationToken::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, cancelling dispatch");
            shutdown.cancel();
        }
    });

    let errors = dispatcher.dispatch(&ctx, &data).await;
    for e in &errors {
        error!(error = %e, "Delivery failed");
    }
    if !errors.is_empty() {
        bail!("{} deliveries failed", errors.len());
    }

    info!("All notifications delivered");
    Ok(())
}
