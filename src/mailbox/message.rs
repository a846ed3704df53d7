use mailparse::{DispositionType, MailHeaderMap, MailParseError, ParsedMail, parse_mail};

/// A file carried by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Name to save under: the last segment of `filename`, so a sender
    /// supplied name never points outside the destination directory.
    pub fn file_name(&self) -> &str {
        match self.filename.rsplit(['/', '\\']).next() {
            Some(name) if !name.is_empty() && name != "." && name != ".." => name,
            _ => "attachment",
        }
    }
}

/// The readable parts of a stored message
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: Option<String>,
    /// Plain text body, or the HTML body if there is no plain part
    pub body: Option<String>,
    pub body_is_html: bool,
    pub attachments: Vec<Attachment>,
}

impl ParsedMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, MailParseError> {
        let mail = parse_mail(raw)?;
        let header = |name: &str| mail.headers.get_first_value(name);

        let mut parts = Parts::default();
        parts.collect(&mail)?;

        let (body, body_is_html) = match (parts.text, parts.html) {
            (Some(text), _) => (Some(text), false),
            (None, Some(html)) => (Some(html), true),
            (None, None) => (None, false),
        };

        Ok(Self {
            from: header("From").unwrap_or_else(|| "Unknown".to_string()),
            to: header("To").unwrap_or_else(|| "Unknown".to_string()),
            subject: header("Subject").unwrap_or_else(|| "No Subject".to_string()),
            date: header("Date"),
            body,
            body_is_html,
            attachments: parts.attachments,
        })
    }
}

/// Walks the MIME tree keeping the first text and HTML bodies and every
/// attachment.
#[derive(Default)]
struct Parts {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl Parts {
    fn collect(&mut self, part: &ParsedMail) -> Result<(), MailParseError> {
        if !part.subparts.is_empty() {
            for sub in &part.subparts {
                self.collect(sub)?;
            }
            return Ok(());
        }

        let disposition = part.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned();

        if disposition.disposition == DispositionType::Attachment || filename.is_some() {
            self.attachments.push(Attachment {
                filename: filename.unwrap_or_else(|| "unnamed".to_string()),
                content_type: part.ctype.mimetype.clone(),
                data: part.get_body_raw()?,
            });
            return Ok(());
        }

        match part.ctype.mimetype.as_str() {
            "text/plain" if self.text.is_none() => self.text = Some(part.get_body()?),
            "text/html" if self.html.is_none() => self.html = Some(part.get_body()?),
            _ => {}
        }
        Ok(())
    }
}
