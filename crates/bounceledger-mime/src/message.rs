//! MIME message structure and parsing.

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

/// Nesting limit for multipart and embedded messages. Deeper structures are
/// kept as opaque leaf bodies.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// A node of the MIME tree.
///
/// Multipart entities carry their children in `parts`; an encapsulated
/// `message/rfc822` entity carries the embedded message as its single child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body, still transfer-encoded.
    pub body: Vec<u8>,
    /// Child parts.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    /// Parses an entity (headers, blank line, body) and its children.
    fn parse(raw: &[u8], depth: usize) -> Self {
        let (head, body) = split_head_body(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(head));
        let mut part = Self::new(headers, body.to_vec());

        if depth >= MAX_DEPTH {
            debug!("MIME nesting limit reached, keeping part as a leaf");
            return part;
        }

        let content_type = part.content_type();
        if content_type.is_multipart() {
            match content_type.boundary() {
                Some(boundary) => {
                    part.parts = split_multipart(body, boundary)
                        .into_iter()
                        .map(|section| Self::parse(section, depth + 1))
                        .collect();
                }
                None => debug!("Multipart entity without boundary, keeping as a leaf"),
            }
        } else if content_type.is_embedded_message() {
            let decoded = part.decode_body().unwrap_or_else(|_| body.to_vec());
            part.parts = vec![Self::parse(&decoded, depth + 1)];
        }

        part
    }

    /// Gets the content type, falling back to `text/plain` when the header
    /// is missing or malformed.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        match self.headers.get("content-type").map(ContentType::parse) {
            Some(Ok(content_type)) => content_type,
            Some(Err(e)) => {
                debug!("Ignoring malformed content type: {e}");
                ContentType::text_plain()
            }
            None => ContentType::text_plain(),
        }
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Checks if this part is a multipart container.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.content_type().is_multipart()
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is declared Base64 but is not.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body),
            TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(&self.body)),
            _ => Ok(self.body.clone()),
        }
    }

    /// Gets the decoded body as text.
    ///
    /// Never fails: a body that cannot be transfer-decoded is returned as
    /// it is, and invalid characters are replaced.
    #[must_use]
    pub fn decoded_text(&self) -> String {
        let bytes = self.decode_body().unwrap_or_else(|e| {
            debug!("Falling back to raw body: {e}");
            self.body.clone()
        });
        decode_charset(&bytes, self.content_type().charset())
    }

    /// Iterates depth-first over this part and all of its descendants.
    pub fn walk(&self) -> impl Iterator<Item = &Self> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out.into_iter()
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a Self>) {
        out.push(self);
        for child in &self.parts {
            child.collect_into(out);
        }
    }

    /// Finds the first `text/plain` leaf, not descending into embedded
    /// messages.
    #[must_use]
    pub fn find_text_part(&self) -> Option<&Self> {
        let content_type = self.content_type();
        if content_type.is_embedded_message() {
            return None;
        }
        if self.parts.is_empty() {
            return content_type.is("text", "plain").then_some(self);
        }
        self.parts.iter().find_map(Self::find_text_part)
    }
}

/// A parsed email message.
///
/// Immutable once parsed. The raw bytes are kept alongside the decoded
/// MIME tree so that consumers needing the original (signature matchers,
/// archivers) can still reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    raw: Vec<u8>,
    root: Part,
}

impl Message {
    /// Parses a raw RFC 5322 message.
    ///
    /// Never fails. Missing or malformed structure degrades to empty headers,
    /// a `text/plain` content type, or an unsplit body.
    #[must_use]
    pub fn parse(raw: impl AsRef<[u8]>) -> Self {
        let raw = raw.as_ref();
        Self {
            raw: raw.to_vec(),
            root: Part::parse(raw, 0),
        }
    }

    /// Gets the original bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Gets the top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Gets the first value of a top-level header (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.root.headers.get(name)
    }

    /// Gets the raw body (everything after the header block) as text.
    #[must_use]
    pub fn body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.root.body)
    }

    /// Gets the body decoded per the top-level transfer encoding.
    #[must_use]
    pub fn decoded_text(&self) -> String {
        self.root.decoded_text()
    }

    /// Gets the top-level entity as a MIME part.
    #[must_use]
    pub const fn root(&self) -> &Part {
        &self.root
    }

    /// Gets the top-level child parts (empty for single-part messages).
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.root.parts
    }

    /// Iterates depth-first over every entity of the message.
    pub fn walk(&self) -> impl Iterator<Item = &Part> {
        self.root.walk()
    }

    /// Gets the content type.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.root.content_type()
    }

    /// Checks if this is a multipart message.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.root.is_multipart()
    }

    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.header("from")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.header("to")
    }

    /// Gets the Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.header("subject")
    }

    /// Gets the Subject header with RFC 2047 encoded words decoded.
    #[must_use]
    pub fn decoded_subject(&self) -> Option<String> {
        self.root.headers.get_decoded("subject")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.header("message-id")
    }

    /// Gets the decoded text of the first `text/plain` entity outside any
    /// embedded message.
    #[must_use]
    pub fn text_part(&self) -> Option<String> {
        self.root.find_text_part().map(Part::decoded_text)
    }
}

/// Splits an entity at the first empty line.
///
/// Without an empty line, the entity is all headers if it starts with a
/// header field and all body otherwise.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut offset = 0;
    for line in raw.split_inclusive(|&b| b == b'\n') {
        if trim_line_end(line).is_empty() {
            return (&raw[..offset], &raw[offset + line.len()..]);
        }
        offset += line.len();
    }

    let first_line = raw.split(|&b| b == b'\n').next().unwrap_or_default();
    if Headers::parse(&String::from_utf8_lossy(first_line)).is_empty() {
        (&raw[..0], raw)
    } else {
        (raw, &raw[raw.len()..])
    }
}

/// Splits a multipart body into its sections.
///
/// Preamble and epilogue are dropped. A missing closing delimiter is
/// tolerated: the last section runs to the end of the body.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut sections = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive(|&b| b == b'\n') {
        let trimmed = trim_line_end(line);
        if let Some(rest) = trimmed.strip_prefix(delimiter) {
            let closing = rest.starts_with(b"--");
            let rest = if closing { &rest[2..] } else { rest };
            if rest.iter().all(u8::is_ascii_whitespace) {
                if let Some(section_start) = start.take() {
                    sections.push(strip_line_break(&body[section_start..offset]));
                }
                if closing {
                    return sections;
                }
                start = Some(offset + line.len());
            }
        }
        offset += line.len();
    }

    if let Some(section_start) = start {
        sections.push(&body[section_start..]);
    }
    sections
}

/// Strips the line terminator (and trailing blanks) from a line.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &line[..end]
}

/// Removes the single line break that belongs to the following delimiter.
fn strip_line_break(section: &[u8]) -> &[u8] {
    section
        .strip_suffix(b"\r\n")
        .or_else(|| section.strip_suffix(b"\n"))
        .unwrap_or(section)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    const MULTIPART: &str = concat!(
        "From: MAILER-DAEMON@mx.example.com\r\n",
        "To: sender@example.org\r\n",
        "Subject: Undelivered Mail Returned to Sender\r\n",
        "Content-Type: multipart/report; report-type=delivery-status;\r\n",
        "\tboundary=\"XYZ\"\r\n",
        "\r\n",
        "This is a MIME-encapsulated message.\r\n",
        "\r\n",
        "--XYZ\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "Delivery failed for caf=C3=A9@example.com\r\n",
        "--XYZ\r\n",
        "Content-Type: message/delivery-status\r\n",
        "\r\n",
        "Reporting-MTA: dns; mx.example.com\r\n",
        "\r\n",
        "Final-Recipient: rfc822; user@example.com\r\n",
        "Status: 5.1.1\r\n",
        "--XYZ\r\n",
        "Content-Type: message/rfc822\r\n",
        "\r\n",
        "Subject: original\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "Original body\r\n",
        "--XYZ--\r\n",
        "epilogue\r\n"
    );

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-unknown"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_part_body_text() {
        let mut headers = Headers::new();
        headers.add("content-type", "text/plain; charset=utf-8");
        let part = Part::new(headers, b"Hello, World!".to_vec());

        assert_eq!(part.decoded_text(), "Hello, World!");
    }

    #[test]
    fn test_part_base64_body() {
        let mut headers = Headers::new();
        headers.add("Content-Transfer-Encoding", "base64");
        let part = Part::new(headers, b"SGVsbG8s\r\nIFdvcmxkIQ==\r\n".to_vec());

        assert_eq!(part.decoded_text(), "Hello, World!");
    }

    #[test]
    fn test_part_invalid_base64_falls_back_to_raw() {
        let mut headers = Headers::new();
        headers.add("Content-Transfer-Encoding", "base64");
        let part = Part::new(headers, b"*** not base64 ***".to_vec());

        assert!(part.decode_body().is_err());
        assert_eq!(part.decoded_text(), "*** not base64 ***");
    }

    #[test]
    fn test_message_single_part() {
        let raw = "From: sender@example.com\r\nTo: recipient@example.com\r\nSubject: Test\r\n\r\nHello, World!";
        let message = Message::parse(raw);

        assert_eq!(message.from(), Some("sender@example.com"));
        assert_eq!(message.to(), Some("recipient@example.com"));
        assert_eq!(message.subject(), Some("Test"));
        assert_eq!(message.body(), "Hello, World!");
        assert_eq!(message.decoded_text(), "Hello, World!");
        assert!(!message.is_multipart());
        assert!(message.parts().is_empty());
        assert_eq!(message.raw(), raw.as_bytes());
    }

    #[test]
    fn test_message_without_content_type_keeps_utf8() {
        let message = Message::parse("Subject: Unzustellbar\n\nEmpfänger unbekannt\n");
        assert_eq!(message.content_type().charset(), Some("us-ascii"));
        assert_eq!(message.decoded_text(), "Empfänger unbekannt\n");
    }

    #[test]
    fn test_message_windows_1252_body() {
        let raw = b"Content-Type: text/plain; charset=windows-1252\n\n\x93Mailbox full\x94 \x96 sorry\n";
        let message = Message::parse(&raw[..]);
        assert_eq!(
            message.decoded_text(),
            "\u{201C}Mailbox full\u{201D} \u{2013} sorry\n"
        );
    }

    #[test]
    fn test_message_lf_only() {
        let message = Message::parse("Subject: lf\n\nline one\nline two\n");
        assert_eq!(message.subject(), Some("lf"));
        assert_eq!(message.body(), "line one\nline two\n");
    }

    #[test]
    fn test_message_multipart_report() {
        let message = Message::parse(MULTIPART);

        assert!(message.is_multipart());
        assert_eq!(message.content_type().report_type(), Some("delivery-status"));
        assert_eq!(message.parts().len(), 3);

        let text = &message.parts()[0];
        assert_eq!(text.decoded_text(), "Delivery failed for café@example.com");

        let status = &message.parts()[1];
        assert!(status.content_type().is("message", "delivery-status"));
        assert!(status.decoded_text().contains("Status: 5.1.1"));

        let embedded = &message.parts()[2];
        assert!(embedded.content_type().is_embedded_message());
        assert_eq!(embedded.parts.len(), 1);
        assert_eq!(embedded.parts[0].headers.get("subject"), Some("original"));
    }

    #[test]
    fn test_message_text_part_skips_embedded() {
        let message = Message::parse(MULTIPART);
        assert_eq!(
            message.text_part().as_deref(),
            Some("Delivery failed for café@example.com")
        );
        assert_eq!(message.walk().count(), 5);
    }

    #[test]
    fn test_message_missing_closing_boundary() {
        let raw = "Content-Type: multipart/mixed; boundary=b\n\n--b\n\nfirst\n--b\n\nsecond\n";
        let message = Message::parse(raw);
        assert_eq!(message.parts().len(), 2);
        assert_eq!(message.parts()[1].decoded_text(), "second\n");
    }

    #[test]
    fn test_message_garbage_degrades() {
        let message = Message::parse(b"\xff\xfe garbage without structure");
        assert!(message.headers().is_empty());
        assert_eq!(message.subject(), None);
        assert!(message.body().contains("garbage"));

        let empty = Message::parse(b"");
        assert!(empty.headers().is_empty());
        assert_eq!(empty.body(), "");
    }

    #[test]
    fn test_message_malformed_content_type() {
        let message = Message::parse("Content-Type: bogus\r\n\r\nbody");
        assert!(message.content_type().is("text", "plain"));
        assert_eq!(message.decoded_text(), "body");
    }

    #[test]
    fn test_message_headers_only() {
        let message = Message::parse("Subject: only headers");
        assert_eq!(message.subject(), Some("only headers"));
        assert_eq!(message.body(), "");
    }
}
