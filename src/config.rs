//! Settings file loading
//!
//! Settings are read from a JSON file. Every field has a default, so a file
//! only needs the keys it wants to change:
//!
//! ```json
//! { "server": { "port": 2525 }, "validation": { "max_recipients": 10 } }
//! ```

use crate::validation::{AttachmentRules, ValidationRules};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "smtp-lab.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
    pub validation: ValidationRules,
    pub attachments: AttachmentRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Name announced in the greeting and HELO/EHLO replies
    pub hostname: String,
    pub mailbox_dir: PathBuf,
    pub failure_log: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1025,
            hostname: "smtp-lab.local".to_string(),
            mailbox_dir: PathBuf::from("mailboxes"),
            failure_log: PathBuf::from("server_delivery_failures.json"),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub default_server_host: String,
    pub default_server_port: u16,
    pub timeout_secs: u64,
    pub failure_log: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_server_host: "127.0.0.1".to_string(),
            default_server_port: 1025,
            timeout_secs: 30,
            failure_log: PathBuf::from("delivery_failures.json"),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `smtp_lab=debug`
    pub level: String,
    pub server_log_file: Option<PathBuf>,
    pub client_log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            server_log_file: Some(PathBuf::from("smtp_server.log")),
            client_log_file: Some(PathBuf::from("smtp_client.log")),
        }
    }
}

impl Settings {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}
