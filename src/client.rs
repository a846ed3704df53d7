//! Sending mail to the lab server
//!
//! Messages are checked against the configured rules before any network
//! activity, then handed to lettre's plain SMTP transport.

use crate::failures::FailureLog;
use crate::validation::{AttachmentRules, ValidationError, ValidationRules};

use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp;
use lettre::{Message, SmtpTransport, Transport};
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Connection refused by {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },

    #[error("Server rejected message: {0}")]
    Rejected(String),

    #[error("SMTP error: {0}")]
    Transport(#[source] smtp::Error),

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("Invalid mailbox: {0}")]
    Address(#[from] AddressError),

    #[error("Unsupported attachment type: {0}")]
    ContentType(String),

    #[error("Failed to read attachment {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl ClientError {
    /// Whether the message never reached a listening server
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, ClientError::ConnectionRefused { .. })
    }
}

/// A message to send through [`SmtpClient`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl OutgoingEmail {
    pub fn new(
        from: impl Into<String>,
        to: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to,
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }
}

pub struct SmtpClient {
    host: String,
    port: u16,
    timeout: Duration,
    rules: ValidationRules,
    attachment_rules: AttachmentRules,
    failures: Option<Mutex<FailureLog>>,
}

impl SmtpClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            rules: ValidationRules::default(),
            attachment_rules: AttachmentRules::default(),
            failures: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules, attachment_rules: AttachmentRules) -> Self {
        self.rules = rules;
        self.attachment_rules = attachment_rules;
        self
    }

    /// Record every failed send in `log`
    pub fn with_failure_log(mut self, log: FailureLog) -> Self {
        self.failures = Some(Mutex::new(log));
        self
    }

    /// Validate and send `email`.
    ///
    /// Validation errors are returned before connecting and are not logged
    /// as failed deliveries.
    pub fn send(&self, email: &OutgoingEmail) -> Result<(), ClientError> {
        self.rules
            .validate_outgoing(&email.from, &email.to, &email.subject, &email.body)?;
        self.attachment_rules.validate_attachments(&email.attachments)?;

        let result = build_message(email).and_then(|message| {
            self.transport()
                .send(&message)
                .map_err(|e| self.classify(e))
        });

        match &result {
            Ok(_) => info!(
                "Email sent from {} to {}",
                email.from,
                email.to.join(", ")
            ),
            Err(e) => {
                error!("Failed to send email: {e}");
                self.record_failure(email, &failure_reason(e));
            }
        }
        result.map(|_| ())
    }

    /// Whether a server answers on the configured address
    pub fn test_connection(&self) -> bool {
        match self.transport().test_connection() {
            Ok(ok) => ok,
            Err(e) => {
                debug!("Connection test to {}:{} failed: {e}", self.host, self.port);
                false
            }
        }
    }

    fn transport(&self) -> SmtpTransport {
        SmtpTransport::builder_dangerous(self.host.as_str())
            .port(self.port)
            .timeout(Some(self.timeout))
            .build()
    }

    fn classify(&self, err: smtp::Error) -> ClientError {
        if err.is_permanent() {
            ClientError::Rejected(err.to_string())
        } else if refused(&err) {
            ClientError::ConnectionRefused {
                host: self.host.clone(),
                port: self.port,
            }
        } else {
            ClientError::Transport(err)
        }
    }

    fn record_failure(&self, email: &OutgoingEmail, reason: &str) {
        let Some(failures) = &self.failures else {
            return;
        };
        let mut log = failures.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = log.record(&email.from, &email.to, &email.subject, reason) {
            error!("Could not record failed delivery: {e}");
        }
    }
}

fn failure_reason(err: &ClientError) -> String {
    match err {
        ClientError::ConnectionRefused { host, port } => {
            format!("Connection refused - is the server running on {host}:{port}?")
        }
        other => other.to_string(),
    }
}

/// Walk the source chain looking for a refused TCP connect
fn refused(err: &smtp::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if io.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    false
}

fn build_message(email: &OutgoingEmail) -> Result<Message, ClientError> {
    let mut builder = Message::builder()
        .from(email.from.trim().parse::<Mailbox>()?)
        .subject(email.subject.as_str());
    for recipient in &email.to {
        builder = builder.to(recipient.trim().parse::<Mailbox>()?);
    }

    if email.attachments.is_empty() {
        return Ok(builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?);
    }

    let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
    for path in &email.attachments {
        multipart = multipart.singlepart(attachment_part(path)?);
    }
    Ok(builder.multipart(multipart)?)
}

fn attachment_part(path: &Path) -> Result<SinglePart, ClientError> {
    let data = std::fs::read(path).map_err(|source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());

    let mime = guess_mime(path);
    let content_type =
        ContentType::parse(mime).map_err(|_| ClientError::ContentType(mime.to_string()))?;
    Ok(Attachment::new(filename).body(data, content_type))
}

fn guess_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
