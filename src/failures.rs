//! Failed delivery records
//!
//! Client and server each keep a JSON array of failures. The delivery
//! status view merges both.

use crate::client::{ClientError, OutgoingEmail, SmtpClient};

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum FailureLogError {
    #[error("Failed to write failure log {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to remove failure log {}: {source}", .path.display())]
    Remove { path: PathBuf, source: io::Error },

    #[error("Failed to encode failure log: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub reason: String,
}

impl FailureRecord {
    pub fn new(sender: &str, recipients: &[String], subject: &str, reason: &str) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS` for display
    pub fn short_timestamp(&self) -> String {
        self.timestamp.chars().take(19).collect::<String>().replace('T', " ")
    }
}

/// A failure log file and its records
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    records: Vec<FailureRecord>,
}

impl FailureLog {
    /// Load the log at `path`. A missing file is an empty log; an unreadable
    /// one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        if !records.is_empty() {
            info!(
                "Loaded {} failed deliveries from {}",
                records.len(),
                path.display()
            );
        }
        Self { path, records }
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    /// Append a record and rewrite the file
    pub fn record(
        &mut self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        reason: &str,
    ) -> Result<(), FailureLogError> {
        self.records
            .push(FailureRecord::new(sender, recipients, subject, reason));
        if let Err(e) = self.flush() {
            self.records.pop();
            return Err(e);
        }
        info!("Failed delivery logged: {reason}");
        Ok(())
    }

    fn flush(&self) -> Result<(), FailureLogError> {
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, json).map_err(|source| FailureLogError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Drop every record and delete the file
    pub fn clear(&mut self) -> Result<(), FailureLogError> {
        self.records.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FailureLogError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn load_records(path: &Path) -> Vec<FailureRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Error loading failed deliveries from {}: {e}", path.display());
            return Vec::new();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("Error loading failed deliveries from {}: {e}", path.display());
        Vec::new()
    })
}

/// Body sent when a failed delivery is resent by hand
pub const RETRY_BODY: &str = "[Retry] Email re-delivery attempt after previous failure";

/// Which side recorded a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    Client,
    Server,
}

/// Client and server failure logs viewed together
#[derive(Debug, Clone)]
pub struct DeliveryStatus {
    client_log: PathBuf,
    server_log: PathBuf,
}

impl DeliveryStatus {
    pub fn new(client_log: impl Into<PathBuf>, server_log: impl Into<PathBuf>) -> Self {
        Self {
            client_log: client_log.into(),
            server_log: server_log.into(),
        }
    }

    /// Every record from both logs, newest first
    pub fn all(&self) -> Vec<(FailureSource, FailureRecord)> {
        let client = load_records(&self.client_log)
            .into_iter()
            .map(|r| (FailureSource::Client, r));
        let server = load_records(&self.server_log)
            .into_iter()
            .map(|r| (FailureSource::Server, r));

        let mut all: Vec<_> = client.chain(server).collect();
        all.sort_by(|(_, a), (_, b)| b.timestamp.cmp(&a.timestamp));
        all
    }

    pub fn clear(&self) -> Result<(), FailureLogError> {
        FailureLog::open(&self.client_log).clear()?;
        FailureLog::open(&self.server_log).clear()
    }

    /// Resend a failed delivery with a `[RETRY]` subject. The original
    /// content is not kept, so the body is a fixed notice.
    pub fn retry(&self, record: &FailureRecord, client: &SmtpClient) -> Result<(), ClientError> {
        info!(
            "Retrying delivery from {} to {}",
            record.sender,
            record.recipients.join(", ")
        );
        let email = OutgoingEmail::new(
            record.sender.clone(),
            record.recipients.clone(),
            format!("[RETRY] {}", record.subject),
            RETRY_BODY,
        );
        client.send(&email)
    }
}
