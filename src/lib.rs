//! # SMTP Lab
//!
//! A local playground for SMTP: a small server that stores mail in
//! per-recipient mailboxes on disk, a client that sends to it, and helpers
//! to browse what arrived.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smtp_lab::{
//!     FailureLog, MailboxDelivery, MailboxStore, OutgoingEmail, SmtpClient, SmtpServer,
//! };
//!
//! let store = MailboxStore::new("mailboxes");
//! let delivery = MailboxDelivery::new(store.clone(), FailureLog::open("server_failures.json"));
//!
//! // Binds now, serves on a background thread until `stop()` or drop
//! let mut handle = SmtpServer::new("smtp-lab.local")
//!     .spawn("127.0.0.1:1025", delivery)
//!     .unwrap();
//!
//! let email = OutgoingEmail::new(
//!     "alice@example.com",
//!     vec!["bob@example.com".to_string()],
//!     "Hello",
//!     "Hi Bob",
//! );
//! SmtpClient::new("127.0.0.1", 1025).send(&email).unwrap();
//!
//! for message in store.list_messages("bob@example.com").unwrap() {
//!     println!("{}", message.eml_file);
//! }
//!
//! handle.stop().unwrap();
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client (EHLO advertises `SIZE` only)
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the email body
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! ## Notes
//!
//! - SMTP authentication is not supported.
//! - SSL/TLS connection is not supported.
//! - Mail relay is not supported. Every accepted recipient is local.
//!
//! ## Size Limits
//!
//! The server enforces RFC 821 size limits:
//! - User names: 64 characters max
//! - Domain names: 64 characters max
//! - Paths: 256 characters max
//! - Command lines: 512 characters max
//! - Text lines: 1000 characters max
//! - Recipients: 100 max per message
//!
//! Stricter limits for outgoing mail (recipients, subject and body length,
//! attachments) come from [`ValidationRules`] and [`AttachmentRules`].

pub mod client;
pub mod config;
pub mod delivery;
pub mod failures;
pub mod logging;
pub mod mailbox;
pub mod smtp;
pub mod validation;

pub use client::{ClientError, OutgoingEmail, SmtpClient};
pub use config::Settings;
pub use delivery::{DeliveryEvent, MailboxDelivery};
pub use failures::{DeliveryStatus, FailureLog, FailureRecord, FailureSource};
pub use mailbox::{MailboxError, MailboxStore};
pub use smtp::{
    Envelope, MessageHandler, ServerHandle, SmtpError, SmtpLimits, SmtpResponse, SmtpServer,
};
pub use validation::{AttachmentRules, ValidationError, ValidationRules, validate_address};
