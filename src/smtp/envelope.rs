//! A message as received over SMTP

use chrono::{DateTime, Local};
use std::net::SocketAddr;

/// Sender, recipients and raw content of one SMTP transaction
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Reverse-path from `MAIL FROM`
    pub sender: String,

    /// Forward-paths from `RCPT TO`, in the order given
    pub recipients: Vec<String>,

    /// Message content (headers and body) with dot-stuffing removed
    pub data: String,

    /// Client address, when known
    pub peer: Option<SocketAddr>,

    pub received_at: DateTime<Local>,
}

impl Envelope {
    pub fn new(sender: String, recipients: Vec<String>, data: String) -> Self {
        Self {
            sender,
            recipients,
            data,
            peer: None,
            received_at: Local::now(),
        }
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.recipients
            .iter()
            .any(|addr| addr.eq_ignore_ascii_case(recipient))
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Raw bytes as written to an `.eml` file
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Value of the first `Subject:` header, unfolded but not MIME-decoded.
    pub fn raw_subject(&self) -> Option<String> {
        let mut lines = self.data.lines().peekable();
        while let Some(line) = lines.next() {
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if !name.eq_ignore_ascii_case("subject") {
                continue;
            }
            let mut subject = value.trim().to_string();
            while let Some(next) = lines.peek() {
                if !next.starts_with([' ', '\t']) {
                    break;
                }
                subject.push(' ');
                subject.push_str(next.trim());
                lines.next();
            }
            return Some(subject);
        }
        None
    }
}
