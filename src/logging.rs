//! Tracing subscriber setup

use crate::config::LoggingConfig;

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Which log file a process writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Install the global subscriber: console output plus, if configured, the
/// role's log file. `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LoggingConfig, role: Role) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = match role {
        Role::Server => config.server_log_file.as_deref(),
        Role::Client => config.client_log_file.as_deref(),
    };
    let file = log_file.map(open_log_file).transpose()?;
    let file_layer = file.map(|file| fmt::layer().with_ansi(false).with_writer(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("Couldn't set global tracing subscriber")
}

fn open_log_file(path: &Path) -> Result<Arc<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    Ok(Arc::new(file))
}
