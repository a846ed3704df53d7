//! Stores received messages in per-recipient mailboxes

use crate::failures::FailureLog;
use crate::mailbox::MailboxStore;
use crate::smtp::{Envelope, MessageHandler, SmtpResponse};
use crate::validation::validate_address;

use mailparse::{MailHeaderMap, parse_mail};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, mpsc};
use tracing::{error, info, warn};

/// Progress of one message through the delivery handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    Received {
        peer: Option<SocketAddr>,
        sender: String,
        recipients: Vec<String>,
        subject: String,
    },
    Delivered {
        recipient: String,
        path: PathBuf,
    },
    Failed {
        reason: String,
    },
}

/// Server-side [`MessageHandler`] that validates each recipient and writes
/// the message into its mailbox. Failures go to the server failure log.
pub struct MailboxDelivery {
    store: MailboxStore,
    failures: Mutex<FailureLog>,
    events: Option<mpsc::Sender<DeliveryEvent>>,
}

impl MailboxDelivery {
    pub fn new(store: MailboxStore, failures: FailureLog) -> Self {
        Self {
            store,
            failures: Mutex::new(failures),
            events: None,
        }
    }

    /// Report every delivery step on `events`
    pub fn with_events(mut self, events: mpsc::Sender<DeliveryEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    fn emit(&self, event: DeliveryEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn fail(&self, sender: &str, recipients: &[String], subject: &str, reason: String) {
        warn!("{reason}");
        let mut log = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = log.record(sender, recipients, subject, &reason) {
            error!("Could not record failed delivery: {e}");
        }
        drop(log);
        self.emit(DeliveryEvent::Failed { reason });
    }
}

impl MessageHandler for MailboxDelivery {
    fn handle(&self, envelope: Envelope) -> SmtpResponse {
        let sender = envelope.sender.as_str();
        let recipients = &envelope.recipients;

        let subject = match parse_mail(envelope.as_bytes()) {
            Ok(mail) => mail
                .headers
                .get_first_value("Subject")
                .unwrap_or_else(|| "No Subject".to_string()),
            Err(e) => {
                self.fail(
                    sender,
                    recipients,
                    "Unknown",
                    format!("Email parsing error: {e}"),
                );
                return SmtpResponse::rejected("Error parsing email message");
            }
        };

        info!(
            peer = ?envelope.peer,
            "Receiving message from {sender} to {}",
            recipients.join(", ")
        );
        self.emit(DeliveryEvent::Received {
            peer: envelope.peer,
            sender: sender.to_string(),
            recipients: recipients.clone(),
            subject: subject.clone(),
        });

        if let Err(e) = validate_address(sender) {
            self.fail(sender, recipients, &subject, format!("Invalid sender: {e}"));
            return SmtpResponse::rejected("Invalid sender address");
        }

        let mut delivered = 0;
        for recipient in recipients {
            let single = std::slice::from_ref(recipient);

            if let Err(e) = validate_address(recipient) {
                self.fail(
                    sender,
                    single,
                    &subject,
                    format!("Invalid recipient {recipient}: {e}"),
                );
                continue;
            }

            match self
                .store
                .deliver(recipient, sender, &subject, envelope.as_bytes())
            {
                Ok(path) => {
                    delivered += 1;
                    self.emit(DeliveryEvent::Delivered {
                        recipient: recipient.clone(),
                        path,
                    });
                }
                Err(e) => self.fail(
                    sender,
                    single,
                    &subject,
                    format!("Delivery failed to {recipient}: {e}"),
                ),
            }
        }

        if delivered > 0 {
            SmtpResponse::accepted()
        } else {
            SmtpResponse::rejected("Message rejected - all recipients invalid")
        }
    }
}
