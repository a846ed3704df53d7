//! SMTP replies

use crate::smtp::error::{SmtpError, SmtpLimits};

/// A reply line (or multiline reply) sent to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// Three digit reply code, e.g. 250, 354, 550
    pub code: u16,
    /// Text after the code on the first line
    pub message: String,
    /// Extra lines for multiline replies such as EHLO
    pub extra: Vec<String>,
}

impl SmtpResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra: Vec::new(),
        }
    }

    pub fn multiline(code: u16, message: impl Into<String>, extra: Vec<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra,
        }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    /// 220 greeting sent when a client connects
    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} SMTP Lab ready"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(250, format!("{hostname} Hello {client_domain}"))
    }

    /// EHLO reply. Only SIZE is advertised: no PIPELINING, STARTTLS or AUTH.
    pub fn ehlo(hostname: &str, client_domain: &str) -> Self {
        Self::multiline(
            250,
            format!("{hostname} Hello {client_domain}"),
            vec![format!("SIZE {}", SmtpLimits::MAX_DATA_SIZE)],
        )
    }

    pub fn data_start() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit(hostname: &str) -> Self {
        Self::new(221, format!("{hostname} closing connection"))
    }

    /// 250 reply after a message reached at least one mailbox
    pub fn accepted() -> Self {
        Self::new(250, "Message accepted for delivery")
    }

    /// 550 permanent rejection
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(550, message)
    }

    /// Wire format, CRLF terminated
    pub fn format(&self) -> String {
        if self.extra.is_empty() {
            return format!("{} {}\r\n", self.code, self.message);
        }

        let mut out = format!("{}-{}\r\n", self.code, self.message);
        let last = self.extra.len() - 1;
        for (i, line) in self.extra.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
        }
        out
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    pub fn closes_connection(&self) -> bool {
        self.code == 221 || self.code == 421
    }
}

impl From<&SmtpError> for SmtpResponse {
    fn from(err: &SmtpError) -> Self {
        Self::new(err.reply_code(), err.reply_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_names_host() {
        let response = SmtpResponse::greeting("lab.local");
        assert_eq!(response.code, 220);
        assert_eq!(response.format(), "220 lab.local SMTP Lab ready\r\n");
    }

    #[test]
    fn test_ehlo_advertises_size_only() {
        let formatted = SmtpResponse::ehlo("server.local", "client.local").format();
        assert!(formatted.starts_with("250-server.local Hello client.local\r\n"));
        assert!(formatted.ends_with(&format!("250 SIZE {}\r\n", SmtpLimits::MAX_DATA_SIZE)));
        assert!(!formatted.contains("PIPELINING"));
        assert!(!formatted.contains("STARTTLS"));
    }

    #[test]
    fn test_multiline_format() {
        let response = SmtpResponse::multiline(
            250,
            "Hello",
            vec!["SIZE 1000".to_owned(), "8BITMIME".to_owned()],
        );
        assert_eq!(
            response.format(),
            "250-Hello\r\n250-SIZE 1000\r\n250 8BITMIME\r\n"
        );
    }

    #[test]
    fn test_success_and_error() {
        assert!(SmtpResponse::accepted().is_success());
        assert!(!SmtpResponse::accepted().is_error());
        assert!(SmtpResponse::rejected("nope").is_error());
        assert!(SmtpResponse::new(421, "Service not available").is_error());
        assert!(!SmtpResponse::data_start().is_success());
    }

    #[test]
    fn test_from_error() {
        let response = SmtpResponse::from(&SmtpError::TooManyRecipients { max: 100 });
        assert_eq!(response.code, 552);
        assert_eq!(response.message, "Too many recipients (max 100)");
    }

    #[test]
    fn test_quit_closes_connection() {
        assert!(SmtpResponse::quit("lab.local").closes_connection());
        assert!(!SmtpResponse::ok().closes_connection());
    }
}
