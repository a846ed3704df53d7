//! Command parsing and execution

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// `MAIL FROM:<path>`, path without brackets
    Mail(String),
    /// `RCPT TO:<path>`, path without brackets
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, SmtpError> {
        if line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Ok(Command::Helo(Self::domain_argument("HELO", rest)?)),
            "EHLO" => Ok(Command::Ehlo(Self::domain_argument("EHLO", rest)?)),
            "MAIL" => Ok(Command::Mail(Self::path_argument("FROM:", rest)?)),
            "RCPT" => Ok(Command::Rcpt(Self::path_argument("TO:", rest)?)),
            "DATA" => Self::no_argument(Command::Data, rest),
            "RSET" => Self::no_argument(Command::Rset, rest),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Helo(_) => "HELO",
            Command::Ehlo(_) => "EHLO",
            Command::Mail(_) => "MAIL",
            Command::Rcpt(_) => "RCPT",
            Command::Data => "DATA",
            Command::Rset => "RSET",
            Command::Noop => "NOOP",
            Command::Quit => "QUIT",
        }
    }

    fn domain_argument(verb: &str, rest: &str) -> Result<String, SmtpError> {
        match rest.split_whitespace().next() {
            Some(domain) => Ok(domain.to_string()),
            None => Err(SmtpError::InvalidSyntax(format!(
                "{verb} requires domain argument"
            ))),
        }
    }

    fn no_argument(command: Command, rest: &str) -> Result<Command, SmtpError> {
        if rest.is_empty() {
            Ok(command)
        } else {
            Err(SmtpError::InvalidSyntax(format!(
                "{} command takes no arguments",
                command.verb()
            )))
        }
    }

    /// Extract the bracketed path after `FROM:` / `TO:`.
    ///
    /// ESMTP parameters after the closing bracket (`SIZE=`, `BODY=`) are
    /// ignored.
    fn path_argument(keyword: &str, rest: &str) -> Result<String, SmtpError> {
        let field = keyword.trim_end_matches(':');
        let prefix = rest.get(..keyword.len()).unwrap_or_default();
        if !prefix.eq_ignore_ascii_case(keyword) {
            return Err(SmtpError::InvalidSyntax(format!(
                "expected '{keyword}<address>'"
            )));
        }

        let path = rest[keyword.len()..].trim_start();
        let Some(inner) = path.strip_prefix('<') else {
            return Err(SmtpError::InvalidSyntax(format!(
                "{field} address must be enclosed in angle brackets"
            )));
        };
        let Some(end) = inner.find('>') else {
            return Err(SmtpError::InvalidSyntax(format!(
                "{field} address must be enclosed in angle brackets"
            )));
        };

        let addr = inner[..end].trim();
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(format!(
                "{field} address cannot be empty"
            )));
        }

        if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        Ok(addr.to_string())
    }
}

/// Applies commands to a session and produces replies
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    /// Parse and execute one command line
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let command = Command::parse(command_line)?;
        self.execute(command, session)
    }

    pub fn execute(
        &self,
        command: Command,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute(&command) {
            let needed = match command {
                Command::Mail(_) | Command::Rset => "HELO/EHLO",
                Command::Rcpt(_) => "MAIL",
                _ => "RCPT",
            };
            return Err(SmtpError::InvalidState(format!(
                "{} command requires {needed} first",
                command.verb()
            )));
        }

        match command {
            Command::Helo(domain) => {
                session.greet(domain.clone())?;
                Ok(SmtpResponse::helo(self.hostname, &domain))
            }
            Command::Ehlo(domain) => {
                session.greet(domain.clone())?;
                Ok(SmtpResponse::ehlo(self.hostname, &domain))
            }
            Command::Mail(addr) => {
                validate_path(&addr)?;
                session.set_sender(addr)?;
                Ok(SmtpResponse::ok())
            }
            Command::Rcpt(addr) => {
                validate_path(&addr)?;
                session.add_recipient(addr)?;
                Ok(SmtpResponse::ok())
            }
            Command::Data => {
                session.start_data()?;
                Ok(SmtpResponse::data_start())
            }
            Command::Rset => {
                session.reset();
                Ok(SmtpResponse::ok())
            }
            Command::Noop => Ok(SmtpResponse::ok()),
            Command::Quit => Ok(SmtpResponse::quit(self.hostname)),
        }
    }
}

/// Protocol-level address checks: `user@domain` within RFC size limits.
///
/// The lab's stricter rules (dotted domain) are applied at delivery time so
/// that rejected messages show up in the failure log.
fn validate_path(addr: &str) -> Result<(), SmtpError> {
    let Some((user, domain)) = addr.rsplit_once('@') else {
        return Err(SmtpError::InvalidSyntax(
            "Email address must contain @ symbol".to_string(),
        ));
    };

    if user.len() > SmtpLimits::USER_MAX_LENGTH {
        return Err(SmtpError::UserTooLong {
            max: SmtpLimits::USER_MAX_LENGTH,
        });
    }

    if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
        return Err(SmtpError::DomainTooLong {
            max: SmtpLimits::DOMAIN_MAX_LENGTH,
        });
    }

    if user.is_empty() || domain.is_empty() {
        return Err(SmtpError::InvalidSyntax(
            "Invalid email address format".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> SmtpCommandHandler<'static> {
        SmtpCommandHandler::new("test.local")
    }

    fn ready_for_data() -> SmtpSession {
        let handler = handler();
        let mut session = SmtpSession::new();
        for line in [
            "HELO client.local",
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<recipient@example.com>",
        ] {
            handler.process_command(line, &mut session).unwrap();
        }
        session
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("helo client.local").unwrap(),
            Command::Helo("client.local".to_string())
        );
        assert_eq!(
            Command::parse("MAIL FROM:<a@b.com>").unwrap(),
            Command::Mail("a@b.com".to_string())
        );
        assert_eq!(
            Command::parse("rcpt to: <c@d.com>").unwrap(),
            Command::Rcpt("c@d.com".to_string())
        );
        assert_eq!(Command::parse("DATA\r\n").unwrap(), Command::Data);
        assert_eq!(Command::parse("QUIT").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_ignores_esmtp_parameters() {
        assert_eq!(
            Command::parse("MAIL FROM:<a@b.com> SIZE=1024 BODY=8BITMIME").unwrap(),
            Command::Mail("a@b.com".to_string())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Command::parse("INVALID"),
            Err(SmtpError::InvalidCommand)
        ));
        assert!(matches!(
            Command::parse("HELO"),
            Err(SmtpError::InvalidSyntax(_))
        ));
        assert!(matches!(
            Command::parse("MAIL sender@example.com"),
            Err(SmtpError::InvalidSyntax(_))
        ));
        assert!(matches!(
            Command::parse("MAIL FROM:sender@example.com"),
            Err(SmtpError::InvalidSyntax(_))
        ));
        assert!(matches!(
            Command::parse("DATA now"),
            Err(SmtpError::InvalidSyntax(_))
        ));
        assert!(matches!(
            Command::parse("MAIL FROM:<>"),
            Err(SmtpError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_command_line_too_long() {
        let long_command = "HELO ".to_string() + &"a".repeat(SmtpLimits::COMMAND_LINE_MAX_LENGTH);
        assert!(matches!(
            Command::parse(&long_command),
            Err(SmtpError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_helo_command() {
        let mut session = SmtpSession::new();
        let response = handler()
            .process_command("HELO client.local", &mut session)
            .unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(response.message, "test.local Hello client.local");
        assert_eq!(session.client_domain, Some("client.local".to_string()));
    }

    #[test]
    fn test_ehlo_command() {
        let mut session = SmtpSession::new();
        let response = handler()
            .process_command("EHLO client.local", &mut session)
            .unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(response.extra.len(), 1);
        assert!(response.extra[0].starts_with("SIZE "));
    }

    #[test]
    fn test_mail_without_helo() {
        let mut session = SmtpSession::new();
        let result = handler().process_command("MAIL FROM:<sender@example.com>", &mut session);
        assert!(matches!(result, Err(SmtpError::InvalidState(_))));
    }

    #[test]
    fn test_full_transaction() {
        let mut session = ready_for_data();
        assert_eq!(session.sender, Some("sender@example.com".to_string()));
        assert_eq!(session.recipients, vec!["recipient@example.com".to_string()]);

        let response = handler().process_command("DATA", &mut session).unwrap();
        assert_eq!(response.code, 354);
        assert!(session.in_data_mode());
    }

    #[test]
    fn test_rcpt_without_mail() {
        let mut session = SmtpSession::new();
        handler()
            .process_command("HELO client.local", &mut session)
            .unwrap();

        let result = handler().process_command("RCPT TO:<recipient@example.com>", &mut session);
        assert!(result.is_err());
    }

    #[test]
    fn test_data_without_rcpt() {
        let mut session = SmtpSession::new();
        handler()
            .process_command("HELO client.local", &mut session)
            .unwrap();
        handler()
            .process_command("MAIL FROM:<sender@example.com>", &mut session)
            .unwrap();

        assert!(handler().process_command("DATA", &mut session).is_err());
    }

    #[test]
    fn test_rset_clears_transaction() {
        let mut session = ready_for_data();
        let response = handler().process_command("RSET", &mut session).unwrap();

        assert_eq!(response.code, 250);
        assert!(session.sender.is_none());
        assert!(session.recipients.is_empty());
    }

    #[test]
    fn test_noop_and_quit() {
        let mut session = SmtpSession::new();
        assert_eq!(
            handler().process_command("NOOP", &mut session).unwrap().code,
            250
        );
        assert_eq!(
            handler().process_command("QUIT", &mut session).unwrap().code,
            221
        );
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("user@example.com").is_ok());
        assert!(validate_path("test@localhost").is_ok());

        assert!(validate_path("invalid").is_err());
        assert!(validate_path("@example.com").is_err());
        assert!(validate_path("user@").is_err());

        let long_user = "a".repeat(SmtpLimits::USER_MAX_LENGTH + 1) + "@example.com";
        assert!(matches!(
            validate_path(&long_user),
            Err(SmtpError::UserTooLong { .. })
        ));

        let long_domain = "user@".to_string() + &"a".repeat(SmtpLimits::DOMAIN_MAX_LENGTH + 1);
        assert!(matches!(
            validate_path(&long_domain),
            Err(SmtpError::DomainTooLong { .. })
        ));
    }
}
