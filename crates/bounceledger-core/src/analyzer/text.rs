//! Text extraction shared by the built-in analyzers.

use bounceledger_mime::{Message, Part};
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)] // literal patterns
static ORIGINAL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*-{2,}[ \t]*(original message|below this line is a copy|this is a copy of the message|returned message|the header of the original message|undelivered message follows|unsent message follows|forwarded message)",
    )
    .expect("valid regex")
});

#[allow(clippy::expect_used)] // literal pattern
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+=&'/-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static DAEMON_SENDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[<\s])(?:mailer[-_]?daemon|postmaster)@").expect("valid regex")
});

#[allow(clippy::expect_used)]
static BOUNCE_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(undeliver|undelivered mail|delivery (?:status notification|failure|failed|has failed|report|problem)|mail delivery (?:failed|system|subsystem)|returned mail|failure notice|non[- ]?delivery|could not be delivered|not delivered|delivery notification)",
    )
    .expect("valid regex")
});

#[allow(clippy::expect_used)]
static BOUNCE_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(this is the (?:postfix|qmail-send|mail delivery|mail system) program|could not be delivered|was not delivered|delivery (?:to the following recipients? )?(?:has )?failed|undeliverable|permanent error|following addresses? had permanent fatal errors|unable to deliver)",
    )
    .expect("valid regex")
});

/// Where a block of report text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// A machine-readable `message/delivery-status` entity.
    DeliveryStatus,
    /// Human-readable text.
    Text,
}

/// A block of decoded report text.
#[derive(Debug, Clone)]
pub struct Section {
    /// Origin of the text.
    pub kind: SectionKind,
    /// Decoded text, cut before any inlined copy of the original message.
    pub text: String,
}

/// Collects the decoded text of a report, leaving out returned originals.
///
/// Embedded `message/rfc822` entities and `text/rfc822-headers` parts are
/// skipped, and inlined copies of the original message are cut off at their
/// separator line.
#[must_use]
pub fn report_sections(message: &Message) -> Vec<Section> {
    let mut sections = Vec::new();
    collect_sections(message.root(), &mut sections);
    sections
}

fn collect_sections(part: &Part, out: &mut Vec<Section>) {
    let content_type = part.content_type();
    if content_type.is_embedded_message() || content_type.is("text", "rfc822-headers") {
        return;
    }
    if !part.parts.is_empty() {
        for child in &part.parts {
            collect_sections(child, out);
        }
        return;
    }

    let kind = if content_type.is("message", "delivery-status")
        || content_type.is("message", "global-delivery-status")
    {
        SectionKind::DeliveryStatus
    } else if content_type.is_text() {
        SectionKind::Text
    } else {
        return;
    };

    out.push(Section {
        kind,
        text: cut_at_original(&part.decoded_text()).to_string(),
    });
}

/// Truncates text at the first line announcing a copy of the original
/// message.
#[must_use]
pub fn cut_at_original(text: &str) -> &str {
    ORIGINAL_SEPARATOR
        .find(text)
        .map_or(text, |m| &text[..m.start()])
}

/// Finds the first email address in a piece of text.
#[must_use]
pub fn find_address(text: &str) -> Option<&str> {
    ADDRESS.find(text).map(|m| m.as_str())
}

/// Extracts the address from a DSN recipient field such as
/// `rfc822; <user@example.org>`.
#[must_use]
pub fn recipient_field_address(value: &str) -> Option<&str> {
    let address = value.split_once(';').map_or(value, |(_, address)| address);
    find_address(address)
}

/// Returns true if the message reads like a non-delivery report.
///
/// A `multipart/report`, a mailer-daemon or postmaster sender, a bounce
/// subject, or a bounce phrase in the text before any returned original
/// all count.
#[must_use]
pub fn looks_like_bounce(message: &Message) -> bool {
    if message.content_type().is("multipart", "report") {
        return true;
    }
    if message.from().is_some_and(|from| DAEMON_SENDER.is_match(from)) {
        return true;
    }
    if message
        .decoded_subject()
        .is_some_and(|subject| BOUNCE_SUBJECT.is_match(&subject))
    {
        return true;
    }
    let text = message.text_part().unwrap_or_else(|| message.decoded_text());
    BOUNCE_BODY.is_match(cut_at_original(&text))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cut_at_original_separator() {
        let text = "Delivery failed.\n\n--- Below this line is a copy of the message.\n\nSecret";
        assert_eq!(cut_at_original(text), "Delivery failed.\n\n");
        assert_eq!(cut_at_original("no separator"), "no separator");
    }

    #[test]
    fn find_address_in_text() {
        assert_eq!(
            find_address("<user@example.org>: host mx said:"),
            Some("user@example.org")
        );
        assert_eq!(find_address("<kyle.greenpeace.org[194.0.197.22]>:"), None);
    }

    #[test]
    fn recipient_field() {
        assert_eq!(
            recipient_field_address("rfc822; <user@example.org>"),
            Some("user@example.org")
        );
        assert_eq!(
            recipient_field_address("user@example.org"),
            Some("user@example.org")
        );
    }

    #[test]
    fn bounce_markers() {
        for raw in [
            "Content-Type: multipart/report; boundary=b\n\n--b--\n",
            "From: MAILER-DAEMON@mx.example.com\nSubject: Notice\n\nhello\n",
            "Subject: Undelivered Mail Returned to Sender\n\nhello\n",
            "Subject: Re: your request\n\nThis is the qmail-send program at example.com.\n",
        ] {
            assert!(looks_like_bounce(&Message::parse(raw)), "{raw:?}");
        }
    }

    #[test]
    fn ordinary_mail_is_not_a_bounce() {
        for raw in [
            "From: alice@example.com\nSubject: Lunch and the upgrade\n\nversion 5.1.1 is live\n",
            "From: postmaster-fan@example.com\nSubject: Party\n\nGuests: 450 confirmed\n",
            concat!(
                "Subject: Fwd: newsletter\n",
                "\n",
                "See below.\n",
                "-----Original Message-----\n",
                "This message could not be delivered.\n"
            ),
        ] {
            assert!(!looks_like_bounce(&Message::parse(raw)), "{raw:?}");
        }
    }

    #[test]
    fn sections_skip_returned_original() {
        let raw = concat!(
            "Content-Type: multipart/report; report-type=delivery-status; boundary=b\n",
            "\n",
            "--b\n",
            "Content-Type: text/plain\n",
            "\n",
            "Human text\n",
            "--b\n",
            "Content-Type: message/delivery-status\n",
            "\n",
            "Status: 5.1.1\n",
            "--b\n",
            "Content-Type: message/rfc822\n",
            "\n",
            "Subject: original\n",
            "\n",
            "Status: 2.0.0 inside the original\n",
            "--b--\n"
        );
        let sections = report_sections(&Message::parse(raw));
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].kind, SectionKind::Text);
        assert_eq!(sections[0].text, "Human text");
        assert_eq!(sections[1].kind, SectionKind::DeliveryStatus);
        assert_eq!(sections[1].text, "Status: 5.1.1");
    }
}
