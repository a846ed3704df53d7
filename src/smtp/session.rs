//! Per-connection SMTP state

use crate::smtp::commands::Command;
use crate::smtp::envelope::Envelope;
use crate::smtp::error::{SmtpError, SmtpLimits};

/// Where a session is in the HELO → MAIL → RCPT → DATA sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Waiting for HELO/EHLO
    Initial,
    /// Greeted, ready for MAIL
    GreetingReceived,
    /// MAIL accepted, waiting for RCPT
    MailReceived,
    /// At least one RCPT accepted
    RecipientsReceived,
    /// Collecting message lines until "."
    DataMode,
}

#[derive(Debug)]
pub struct SmtpSession {
    pub state: SmtpState,
    pub client_domain: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    data: Vec<String>,
    data_size: usize,
    /// Set when a data line broke a limit; the message is refused at "."
    data_error: Option<SmtpError>,
}

impl SmtpSession {
    pub fn new() -> Self {
        Self {
            state: SmtpState::Initial,
            client_domain: None,
            sender: None,
            recipients: Vec::new(),
            data: Vec::new(),
            data_size: 0,
            data_error: None,
        }
    }

    /// Drop the current transaction, keeping the greeting
    pub fn reset(&mut self) {
        if self.state != SmtpState::Initial {
            self.state = SmtpState::GreetingReceived;
        }
        self.sender = None;
        self.recipients.clear();
        self.data.clear();
        self.data_size = 0;
        self.data_error = None;
    }

    pub fn greet(&mut self, domain: String) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain);
        self.state = SmtpState::GreetingReceived;
        self.reset();
        Ok(())
    }

    pub fn set_sender(&mut self, sender: String) -> Result<(), SmtpError> {
        if sender.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        self.reset();
        self.sender = Some(sender);
        self.state = SmtpState::MailReceived;
        Ok(())
    }

    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        if recipient.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        if self.recipients.len() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        self.recipients.push(recipient);
        self.state = SmtpState::RecipientsReceived;
        Ok(())
    }

    pub fn start_data(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RecipientsReceived {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.data.clear();
        self.data_size = 0;
        self.data_error = None;
        self.state = SmtpState::DataMode;
        Ok(())
    }

    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::DataMode
    }

    /// Append one message line (terminator already stripped, dots unstuffed).
    ///
    /// After the first limit violation further lines are discarded and the
    /// error is reported by [`SmtpSession::finish_data`].
    pub fn add_data_line(&mut self, line: String) {
        if self.data_error.is_some() {
            return;
        }

        let line_size = line.len() + 2;
        if line_size > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            self.data_error = Some(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
            self.data.clear();
            return;
        }

        if self.data_size + line_size > SmtpLimits::MAX_DATA_SIZE {
            self.data_error = Some(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
            self.data.clear();
            return;
        }

        self.data.push(line);
        self.data_size += line_size;
    }

    /// Close the DATA phase and hand back the transaction.
    ///
    /// The session returns to the greeted state whether or not the message
    /// was acceptable.
    pub fn finish_data(&mut self) -> Result<Envelope, SmtpError> {
        if self.state != SmtpState::DataMode {
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        }

        let outcome = match (self.data_error.take(), self.sender.take()) {
            (Some(err), _) => Err(err),
            (None, None) => Err(SmtpError::InvalidState("No sender specified".to_string())),
            (None, Some(_)) if self.recipients.is_empty() => Err(SmtpError::InvalidState(
                "No recipients specified".to_string(),
            )),
            (None, Some(sender)) => {
                let mut data = self.data.join("\r\n");
                data.push_str("\r\n");
                Ok(Envelope::new(
                    sender,
                    std::mem::take(&mut self.recipients),
                    data,
                ))
            }
        };

        self.state = SmtpState::GreetingReceived;
        self.reset();
        outcome
    }

    pub fn can_execute(&self, command: &Command) -> bool {
        match command {
            Command::Helo(_) | Command::Ehlo(_) | Command::Noop | Command::Quit => true,
            Command::Mail(_) => self.state == SmtpState::GreetingReceived,
            Command::Rcpt(_) => matches!(
                self.state,
                SmtpState::MailReceived | SmtpState::RecipientsReceived
            ),
            Command::Data => self.state == SmtpState::RecipientsReceived,
            Command::Rset => self.state != SmtpState::Initial,
        }
    }

    pub fn current_data_size(&self) -> usize {
        self.data_size
    }
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new()
    }
}
