//! On-disk mailboxes
//!
//! Layout under the store root:
//!
//! ```text
//! mailboxes/
//!   alice_at_example_com/
//!     email_20240101_120000_000001.eml
//!     metadata_20240101_120000_000001.json
//! ```

mod message;

pub use message::{Attachment, ParsedMessage};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("Failed to create mailbox directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("No such mailbox: {0}")]
    UnknownMailbox(String),

    #[error("Recipient {0} does not map to a mailbox folder")]
    InvalidRecipient(String),

    #[error("Could not parse message {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: mailparse::MailParseError,
    },
}

/// JSON sidecar written next to each `.eml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub timestamp: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub filename: String,
}

/// One folder under the store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxSummary {
    /// Directory name, e.g. `alice_at_example_com`
    pub folder: String,
    /// Recipient address the folder belongs to
    pub address: String,
    pub message_count: usize,
}

/// A stored `.eml` file and its sidecar, if present
#[derive(Debug, Clone)]
pub struct MessageEntry {
    pub eml_file: String,
    pub eml_path: PathBuf,
    pub metadata: Option<MessageMetadata>,
}

/// Map a recipient address to its folder name.
///
/// `alice@example.com` becomes `alice_at_example_com`. Every character
/// other than ASCII letters, digits, `_`, `+` and `-` becomes `_`, so the
/// result is always a single path component.
pub fn folder_name(recipient: &str) -> String {
    let mut folder = String::with_capacity(recipient.len());
    for c in recipient.trim().chars() {
        match c {
            '@' => folder.push_str("_at_"),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-') => folder.push(c),
            _ => folder.push('_'),
        }
    }
    folder
}

/// Whether `name` names a direct child of the store root
fn is_folder_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Best-effort inverse of [`folder_name`]. Underscores that were part of the
/// address come back as dots, so prefer the metadata `to` field when present.
pub fn address_from_folder(folder: &str) -> String {
    folder.replace("_at_", "@").replace('_', ".")
}

#[derive(Debug, Clone)]
pub struct MailboxStore {
    root: PathBuf,
}

impl MailboxStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), MailboxError> {
        if self.root.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.root).map_err(|source| MailboxError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        info!("Created mailbox directory: {}", self.root.display());
        Ok(())
    }

    /// Write `raw` into the recipient's mailbox with a metadata sidecar.
    ///
    /// Returns the path of the `.eml` file.
    pub fn deliver(
        &self,
        recipient: &str,
        sender: &str,
        subject: &str,
        raw: &[u8],
    ) -> Result<PathBuf, MailboxError> {
        let folder = folder_name(recipient);
        if !is_folder_component(&folder) {
            return Err(MailboxError::InvalidRecipient(recipient.to_string()));
        }
        let dir = self.root.join(folder);
        fs::create_dir_all(&dir).map_err(|source| MailboxError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let now = Local::now();
        let stamp = unique_stamp(&dir, &now);
        let eml_file = format!("email_{stamp}.eml");
        let eml_path = dir.join(&eml_file);

        fs::write(&eml_path, raw).map_err(|source| MailboxError::Write {
            path: eml_path.clone(),
            source,
        })?;

        let metadata = MessageMetadata {
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            from: sender.to_string(),
            to: recipient.to_string(),
            subject: subject.to_string(),
            filename: eml_file,
        };
        let metadata_path = dir.join(format!("metadata_{stamp}.json"));
        let json = serde_json::to_string_pretty(&metadata)?;
        fs::write(&metadata_path, json).map_err(|source| MailboxError::Write {
            path: metadata_path.clone(),
            source,
        })?;

        info!("Email saved to: {}", eml_path.display());
        Ok(eml_path)
    }

    /// All mailboxes, sorted by folder name. A missing root yields none.
    pub fn list_mailboxes(&self) -> Result<Vec<MailboxSummary>, MailboxError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(MailboxError::Read {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut folders: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        folders.sort();

        folders
            .into_iter()
            .map(|folder| {
                let messages = self.list_messages(&folder)?;
                let address = messages
                    .iter()
                    .find_map(|m| m.metadata.as_ref().map(|meta| meta.to.clone()))
                    .unwrap_or_else(|| address_from_folder(&folder));
                Ok(MailboxSummary {
                    message_count: messages.len(),
                    folder,
                    address,
                })
            })
            .collect()
    }

    /// Find a mailbox by folder name or by recipient address
    pub fn resolve(&self, name: &str) -> Result<String, MailboxError> {
        let candidates = [name.to_string(), folder_name(name)];
        candidates
            .into_iter()
            .find(|folder| is_folder_component(folder) && self.root.join(folder).is_dir())
            .ok_or_else(|| MailboxError::UnknownMailbox(name.to_string()))
    }

    /// Messages in a mailbox, newest first
    pub fn list_messages(&self, mailbox: &str) -> Result<Vec<MessageEntry>, MailboxError> {
        let folder = self.resolve(mailbox)?;
        let dir = self.root.join(&folder);
        let entries = fs::read_dir(&dir).map_err(|source| MailboxError::Read {
            path: dir.clone(),
            source,
        })?;

        let mut eml_files: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".eml"))
            .collect();
        eml_files.sort_by(|a, b| b.cmp(a));

        Ok(eml_files
            .into_iter()
            .map(|eml_file| {
                let metadata = read_metadata(&dir, &eml_file);
                MessageEntry {
                    eml_path: dir.join(&eml_file),
                    eml_file,
                    metadata,
                }
            })
            .collect())
    }

    /// Load and parse a stored message
    pub fn read_message(&self, entry: &MessageEntry) -> Result<ParsedMessage, MailboxError> {
        let raw = fs::read(&entry.eml_path).map_err(|source| MailboxError::Read {
            path: entry.eml_path.clone(),
            source,
        })?;
        ParsedMessage::parse(&raw).map_err(|source| MailboxError::Parse {
            path: entry.eml_path.clone(),
            source,
        })
    }

    pub fn save_attachment(&self, attachment: &Attachment, dest: &Path) -> Result<(), MailboxError> {
        fs::write(dest, &attachment.data).map_err(|source| MailboxError::Write {
            path: dest.to_path_buf(),
            source,
        })?;
        debug!(
            "Saved attachment {} to {}",
            attachment.filename,
            dest.display()
        );
        Ok(())
    }
}

/// Timestamp part of the file names. Appends `_N` if a message with the same
/// stamp already exists in `dir`.
fn unique_stamp(dir: &Path, now: &DateTime<Local>) -> String {
    let base = now.format("%Y%m%d_%H%M%S_%6f").to_string();
    let mut stamp = base.clone();
    let mut n = 1;
    while dir.join(format!("email_{stamp}.eml")).exists() {
        stamp = format!("{base}_{n}");
        n += 1;
    }
    stamp
}

fn read_metadata(dir: &Path, eml_file: &str) -> Option<MessageMetadata> {
    let stem = eml_file.strip_suffix(".eml")?;
    let stamp = stem.strip_prefix("email_").unwrap_or(stem);
    let path = dir.join(format!("metadata_{stamp}.json"));

    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("Ignoring unreadable metadata {}: {e}", path.display());
            None
        }
    }
}
