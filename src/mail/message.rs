//! Inbound email decoding.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::model::AttachmentMeta;

/// A vendor reply decoded from raw RFC 822 bytes.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    /// `Message-ID` header, or `uid:{mailbox}:{uid}` when the header is missing.
    pub message_id: String,
    pub uid: u32,
    /// Lowercased sender address. `None` when the From header has no address.
    pub from: Option<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub attachments: Vec<AttachmentMeta>,
}

impl InboundEmail {
    /// Decode a raw message. Returns `None` if `mail-parser` cannot make
    /// sense of the bytes at all.
    pub fn parse(mailbox: &str, uid: u32, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let message_id = parsed
            .message_id()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| synthetic_message_id(mailbox, uid));

        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let text = parsed
            .text_bodies()
            .find_map(|part| match &part.body {
                PartType::Text(t) => Some(t.to_string()),
                _ => None,
            })
            .filter(|t| !t.trim().is_empty());

        let html = parsed
            .html_bodies()
            .find_map(|part| match &part.body {
                PartType::Html(h) => Some(h.to_string()),
                _ => None,
            })
            .filter(|h| !h.trim().is_empty());

        let date = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

        let attachments = parsed
            .attachments()
            .map(|part| {
                let mimetype = part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                AttachmentMeta {
                    filename: part.attachment_name().unwrap_or("attachment").to_string(),
                    mimetype,
                    size: part.contents().len(),
                }
            })
            .collect();

        Some(Self {
            message_id,
            uid,
            from,
            subject: parsed.subject().unwrap_or_default().trim().to_string(),
            text,
            html,
            date,
            attachments,
        })
    }

    /// Text handed to the proposal parser: plain text part, else HTML with
    /// tags stripped, else empty.
    pub fn body_for_parsing(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        if let Some(html) = &self.html {
            return strip_html(html);
        }
        String::new()
    }

    /// Body as received, kept on the proposal for audit.
    pub fn raw_body(&self) -> Option<&str> {
        self.text.as_deref().or(self.html.as_deref())
    }
}

/// Stable id for a message that carries no Message-ID header.
pub fn synthetic_message_id(mailbox: &str, uid: u32) -> String {
    format!("uid:{mailbox}:{uid}")
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "From: Tech Solutions <Contact@TechSolutions.com>\r\n\
        To: buyer@example.com\r\n\
        Subject: Re: RFP: Office Laptops\r\n\
        Message-ID: <reply-1@techsolutions.com>\r\n\
        Date: Tue, 14 Jan 2025 10:30:00 +0000\r\n\
        \r\n\
        We can deliver 20 laptops for $24,000.\r\n";

    #[test]
    fn parses_plain_text_reply() {
        let email = InboundEmail::parse("INBOX", 7, PLAIN.as_bytes()).unwrap();
        assert_eq!(email.message_id, "reply-1@techsolutions.com");
        assert_eq!(email.uid, 7);
        assert_eq!(email.from.as_deref(), Some("contact@techsolutions.com"));
        assert_eq!(email.subject, "Re: RFP: Office Laptops");
        assert!(email.body_for_parsing().contains("$24,000"));
        assert!(email.html.is_none());
        assert_eq!(
            email.date.map(|d| d.to_rfc3339()),
            Some("2025-01-14T10:30:00+00:00".to_string())
        );
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn missing_message_id_gets_synthetic_id() {
        let raw = "From: a@b.com\r\nSubject: RFP: Chairs\r\n\r\nHello\r\n";
        let email = InboundEmail::parse("INBOX", 42, raw.as_bytes()).unwrap();
        assert_eq!(email.message_id, "uid:INBOX:42");
    }

    #[test]
    fn missing_subject_is_empty() {
        let raw = "From: a@b.com\r\nMessage-ID: <x@y>\r\n\r\nHello\r\n";
        let email = InboundEmail::parse("INBOX", 1, raw.as_bytes()).unwrap();
        assert_eq!(email.subject, "");
    }

    #[test]
    fn html_only_body_is_stripped_for_parsing() {
        let raw = "From: a@b.com\r\n\
            Subject: RFP: Chairs\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <html><body><p>Total: <b>$900</b></p></body></html>\r\n";
        let email = InboundEmail::parse("INBOX", 3, raw.as_bytes()).unwrap();
        assert!(email.html.is_some());
        assert_eq!(email.body_for_parsing(), "Total: $900");
    }

    #[test]
    fn attachment_metadata_is_collected() {
        let raw = "From: a@b.com\r\n\
            Subject: RFP: Chairs\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
            \r\n\
            --XX\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            Quote attached.\r\n\
            --XX\r\n\
            Content-Type: application/pdf\r\n\
            Content-Disposition: attachment; filename=\"quote.pdf\"\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            SGVsbG8=\r\n\
            --XX--\r\n";
        let email = InboundEmail::parse("INBOX", 5, raw.as_bytes()).unwrap();
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "quote.pdf");
        assert_eq!(email.attachments[0].mimetype, "application/pdf");
        assert_eq!(email.attachments[0].size, 5);
        assert!(email.body_for_parsing().contains("Quote attached."));
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
        assert_eq!(strip_html(r#"<a href="https://example.com">Link</a>"#), "Link");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn strip_html_keeps_words_apart_across_blocks() {
        assert_eq!(strip_html("<p>one</p><p>two</p>"), "one two");
    }
}
