//! Address, message and attachment checks shared by client and server

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Email address must not be empty")]
    EmptyAddress,

    #[error("Email must contain '@' symbol: {0}")]
    MissingAt(String),

    #[error("Local part must be 1-64 characters: {0}")]
    BadLocalPart(String),

    #[error("Domain must contain a dot: {0}")]
    DomainWithoutDot(String),

    #[error("Domain cannot start or end with dot: {0}")]
    DomainEdgeDot(String),

    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    #[error("At least one recipient is required")]
    NoRecipients,

    #[error("Too many recipients ({count}, max {max})")]
    TooManyRecipients { count: usize, max: usize },

    #[error("Subject is required")]
    EmptySubject,

    #[error("Subject too long ({len} characters, max {max})")]
    SubjectTooLong { len: usize, max: usize },

    #[error("Body too long ({len} characters, max {max})")]
    BodyTooLong { len: usize, max: usize },

    #[error("Attachments are disabled")]
    AttachmentsDisabled,

    #[error("Too many attachments ({count}, max {max})")]
    TooManyAttachments { count: usize, max: usize },

    #[error("Attachment file not found: {}", .0.display())]
    MissingAttachment(PathBuf),

    #[error("Attachment type not allowed: {}", .0.display())]
    ExtensionNotAllowed(PathBuf),

    #[error("Attachment too large: {} ({size} bytes, max {max} bytes)", .path.display())]
    AttachmentTooLarge { path: PathBuf, size: u64, max: u64 },
}

/// Check that `addr` looks like `local@domain.tld`.
///
/// The address is trimmed first. The split happens at the last `@`.
pub fn validate_address(addr: &str) -> Result<(), ValidationError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ValidationError::EmptyAddress);
    }

    let Some((local, domain)) = addr.rsplit_once('@') else {
        return Err(ValidationError::MissingAt(addr.to_string()));
    };

    if local.is_empty() || local.chars().count() > 64 {
        return Err(ValidationError::BadLocalPart(addr.to_string()));
    }

    if domain.is_empty() || !domain.contains('.') {
        return Err(ValidationError::DomainWithoutDot(addr.to_string()));
    }

    if domain.starts_with('.') || domain.ends_with('.') {
        return Err(ValidationError::DomainEdgeDot(addr.to_string()));
    }

    Ok(())
}

fn domain_of(addr: &str) -> &str {
    addr.trim().rsplit_once('@').map_or("", |(_, domain)| domain)
}

/// Limits applied to outgoing messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub max_subject_length: usize,
    pub max_body_length: usize,
    pub max_recipients: usize,
    /// `None` allows every domain
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_subject_length: 200,
            max_body_length: 10_000,
            max_recipients: 50,
            allowed_domains: None,
        }
    }
}

impl ValidationRules {
    pub fn validate_outgoing(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), ValidationError> {
        validate_address(from)?;

        if to.is_empty() {
            return Err(ValidationError::NoRecipients);
        }
        if to.len() > self.max_recipients {
            return Err(ValidationError::TooManyRecipients {
                count: to.len(),
                max: self.max_recipients,
            });
        }
        for recipient in to {
            validate_address(recipient)?;
            self.check_domain(recipient)?;
        }

        if subject.trim().is_empty() {
            return Err(ValidationError::EmptySubject);
        }
        let subject_len = subject.chars().count();
        if subject_len > self.max_subject_length {
            return Err(ValidationError::SubjectTooLong {
                len: subject_len,
                max: self.max_subject_length,
            });
        }

        let body_len = body.chars().count();
        if body_len > self.max_body_length {
            return Err(ValidationError::BodyTooLong {
                len: body_len,
                max: self.max_body_length,
            });
        }

        Ok(())
    }

    fn check_domain(&self, addr: &str) -> Result<(), ValidationError> {
        let Some(allowed) = &self.allowed_domains else {
            return Ok(());
        };
        let domain = domain_of(addr);
        if allowed.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
            Ok(())
        } else {
            Err(ValidationError::DomainNotAllowed(domain.to_string()))
        }
    }
}

/// Limits applied to files attached to outgoing messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentRules {
    pub enabled: bool,
    pub max_file_size_mb: u64,
    pub max_attachments: usize,
    /// Extensions including the leading dot, compared case-insensitively
    pub allowed_extensions: Vec<String>,
}

impl Default for AttachmentRules {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size_mb: 10,
            max_attachments: 5,
            allowed_extensions: [".txt", ".pdf", ".doc", ".docx", ".jpg", ".png", ".zip"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl AttachmentRules {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn validate_attachments(&self, paths: &[PathBuf]) -> Result<(), ValidationError> {
        if paths.is_empty() {
            return Ok(());
        }
        if !self.enabled {
            return Err(ValidationError::AttachmentsDisabled);
        }
        if paths.len() > self.max_attachments {
            return Err(ValidationError::TooManyAttachments {
                count: paths.len(),
                max: self.max_attachments,
            });
        }
        for path in paths {
            self.check_file(path)?;
        }
        Ok(())
    }

    fn check_file(&self, path: &Path) -> Result<(), ValidationError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(ValidationError::MissingAttachment(path.to_path_buf())),
        };

        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        if !self
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(ValidationError::ExtensionNotAllowed(path.to_path_buf()));
        }

        let max = self.max_file_size_bytes();
        if metadata.len() > max {
            return Err(ValidationError::AttachmentTooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                max,
            });
        }

        Ok(())
    }
}
