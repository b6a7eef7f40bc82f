//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the TOML file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Dispatches alert groups to tenant notification channels.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the alert group JSON to dispatch. Reads stdin when omitted.
    #[arg(short, long, value_name = "FILE")]
    pub alerts: Option<PathBuf>,

    /// Logging level used when `RUST_LOG` is not set.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Label that identifies the tenant of an alert group.
    #[arg(long, value_name = "LABEL")]
    pub tenant_label: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(label) = &self.tenant_label {
            dict.insert("tenant_label".into(), Value::from(label.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
