//! Heuristic status code extraction.
//!
//! Looks for RFC 3463 codes in the report, in this order of trust:
//!
//! 1. a `Status:` field, from a `message/delivery-status` part or inlined in
//!    the text;
//! 2. an SMTP diagnostic line where a reply code is followed by an enhanced
//!    code (`554 5.7.1 ...`);
//! 3. any isolated `c.s.d` token in the text;
//! 4. a bare SMTP reply code opening a diagnostic (`552 ...`), which only
//!    tells the class and yields a generic code.
//!
//! Within one tier the first match in document order wins. Tiers 2 to 4
//! and the loose recipient fallbacks only apply to messages that look like
//! bounces, so version numbers and head counts in ordinary mail are left
//! alone.

use super::text::{
    Section, SectionKind, find_address, looks_like_bounce, recipient_field_address,
    report_sections,
};
use super::{AnalyzerError, MessageAnalyzer};
use crate::dsn::DsnStatus;
use crate::result::AnalyzerResult;
use bounceledger_mime::{Headers, Message};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;

#[allow(clippy::expect_used)] // literal patterns
static STATUS_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]*status:[ \t]*([245])\.([0-9]{1,3})\.([0-9]{1,3})\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static SMTP_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[245][0-9]{2}[ -]#?([245])\.([0-7])\.([0-9]{1,3})\b").expect("valid regex")
});

#[allow(clippy::expect_used)]
static FREE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([245])\.([0-7])\.([0-9]{1,3})\b").expect("valid regex")
});

#[allow(clippy::expect_used)]
static REPLY_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|:)[ \t]*([45][0-9]{2})[ \t-]").expect("valid regex")
});

#[allow(clippy::expect_used)]
static RECIPIENT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]*(?:final|original)-recipient:(.*)$").expect("valid regex")
});

#[allow(clippy::expect_used)]
static PARAGRAPH_RECIPIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*<([^<>\s]+@[^<>\s]+)>").expect("valid regex")
});

/// Finds status codes in delivery reports and SMTP diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCodeAnalyzer;

impl StatusCodeAnalyzer {
    /// Creates the analyzer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MessageAnalyzer for StatusCodeAnalyzer {
    fn id(&self) -> &str {
        "status_code"
    }

    fn analyze(&self, message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        let sections = report_sections(message);

        if let Some(report) = delivery_status_report(&sections) {
            debug!(code = %report.status, "Status from delivery-status part");
            result.set_bounce_status_code(report.status);
            if let Some(refinement) = report.diagnostic {
                result.set_bounce_status_code(refinement);
            }
            if let Some(recipient) = report.recipient {
                result.set_bounce_recipient(recipient);
            }
            return Ok(());
        }

        let lines: Vec<&str> = sections
            .iter()
            .filter(|s| s.kind == SectionKind::Text)
            .flat_map(|s| s.text.lines())
            .collect();

        let bounce = looks_like_bounce(message);
        let Some(found) = find_code(&lines, bounce) else {
            debug!(bounce, "No status code found");
            return Ok(());
        };
        debug!(code = %found.status, line = found.line, "Status from report text");
        result.set_bounce_status_code(found.status);

        let loose = bounce || found.tier == 0;
        let recipient = recipient_field(&lines)
            .or_else(|| failed_recipients_header(message.headers()))
            .or_else(|| loose.then(|| find_address(lines[found.line]))?.map(str::to_string))
            .or_else(|| loose.then(|| paragraph_recipient(&lines, found.line))?);
        if let Some(recipient) = recipient {
            result.set_bounce_recipient(recipient);
        }

        Ok(())
    }
}

/// Facts from the first per-recipient block of a delivery-status part.
struct DeliveryReport {
    status: DsnStatus,
    diagnostic: Option<DsnStatus>,
    recipient: Option<String>,
}

fn delivery_status_report(sections: &[Section]) -> Option<DeliveryReport> {
    sections
        .iter()
        .filter(|s| s.kind == SectionKind::DeliveryStatus)
        .flat_map(|s| field_blocks(&s.text))
        .find_map(|block| {
            let status = block.get("status").and_then(|value| {
                let code = value.split_whitespace().next().unwrap_or_default();
                DsnStatus::parse(code).ok()
            })?;
            let diagnostic = block.get("diagnostic-code").and_then(|value| {
                first_match(&SMTP_DIAGNOSTIC, value).or_else(|| first_match(&FREE_TEXT, value))
            });
            let recipient = block
                .get("final-recipient")
                .or_else(|| block.get("original-recipient"))
                .and_then(recipient_field_address)
                .map(str::to_string);
            Some(DeliveryReport {
                status,
                diagnostic,
                recipient,
            })
        })
}

/// Splits a delivery-status body into its field blocks.
fn field_blocks(text: &str) -> Vec<Headers> {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(Headers::parse)
        .filter(|block| !block.is_empty())
        .collect()
}

struct FoundCode {
    status: DsnStatus,
    line: usize,
    tier: usize,
}

/// Searches the tiers in order. Only the `Status:` tier is tried unless
/// `bounce` is set.
fn find_code(lines: &[&str], bounce: bool) -> Option<FoundCode> {
    let tiers: [(&Regex, fn(&Captures<'_>) -> Option<DsnStatus>); 4] = [
        (&*STATUS_FIELD, enhanced_code),
        (&*SMTP_DIAGNOSTIC, enhanced_code),
        (&*FREE_TEXT, enhanced_code),
        (&*REPLY_CODE, reply_code),
    ];

    let tiers = if bounce { &tiers[..] } else { &tiers[..1] };

    tiers.iter().enumerate().find_map(|(tier, (pattern, convert))| {
        lines.iter().enumerate().find_map(|(line, text)| {
            pattern
                .captures_iter(text)
                .filter(|caps| pattern_is_isolated(text, caps))
                .find_map(|caps| convert(&caps))
                .map(|status| FoundCode { status, line, tier })
        })
    })
}

/// Rejects matches that are really part of a longer dotted number such as
/// an IP address or a version string.
fn pattern_is_isolated(text: &str, caps: &Captures<'_>) -> bool {
    let Some(whole) = caps.get(0) else {
        return false;
    };
    let before = text[..whole.start()].chars().next_back();
    let mut after = text[whole.end()..].chars();
    let dotted_before = before == Some('.');
    let dotted_after = after.next() == Some('.') && after.next().is_some_and(|c| c.is_ascii_digit());
    !dotted_before && !dotted_after
}

fn enhanced_code(caps: &Captures<'_>) -> Option<DsnStatus> {
    Some(DsnStatus::new(
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

fn reply_code(caps: &Captures<'_>) -> Option<DsnStatus> {
    DsnStatus::from_reply_code(caps.get(1)?.as_str().parse().ok()?)
}

fn first_match(pattern: &Regex, text: &str) -> Option<DsnStatus> {
    pattern
        .captures_iter(text)
        .filter(|caps| pattern_is_isolated(text, caps))
        .find_map(|caps| enhanced_code(&caps))
}

fn recipient_field(lines: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        let caps = RECIPIENT_FIELD.captures(line)?;
        recipient_field_address(caps.get(1)?.as_str()).map(str::to_string)
    })
}

/// Exim and some hosted services name the failed recipients in a header.
fn failed_recipients_header(headers: &Headers) -> Option<String> {
    headers
        .get("x-failed-recipients")
        .and_then(find_address)
        .map(str::to_string)
}

/// Postfix opens each recipient paragraph with `<address>:`.
fn paragraph_recipient(lines: &[&str], line: usize) -> Option<String> {
    lines[..=line]
        .iter()
        .rev()
        .take_while(|text| !text.trim().is_empty())
        .find_map(|text| PARAGRAPH_RECIPIENT.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
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

    fn analyze(raw: &str) -> AnalyzerResult {
        let mut result = AnalyzerResult::new();
        StatusCodeAnalyzer::new()
            .analyze(&Message::parse(raw), &mut result)
            .unwrap();
        result
    }

    #[test]
    fn delivery_status_part_wins() {
        let result = analyze(concat!(
            "Content-Type: multipart/report; report-type=delivery-status; boundary=b\n",
            "\n",
            "--b\n",
            "Content-Type: text/plain\n",
            "\n",
            "host said: 550 5.7.1 rejected\n",
            "--b\n",
            "Content-Type: message/delivery-status\n",
            "\n",
            "Reporting-MTA: dns; mx.example.com\n",
            "\n",
            "Final-Recipient: rfc822; user@example.com\n",
            "Action: failed\n",
            "Status: 5.1.1\n",
            "--b--\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
        assert_eq!(result.bounce_recipient(), Some("user@example.com"));
    }

    #[test]
    fn generic_status_field_refined_by_diagnostic() {
        let result = analyze(concat!(
            "Content-Type: multipart/report; boundary=b\n",
            "\n",
            "--b\n",
            "Content-Type: message/delivery-status\n",
            "\n",
            "Final-Recipient: rfc822;someone@example.net\n",
            "Status: 5.0.0\n",
            "Diagnostic-Code: smtp; 550 5.1.1 <someone@example.net>: Recipient address\n",
            "    rejected: User unknown\n",
            "--b--\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
        assert_eq!(result.bounce_recipient(), Some("someone@example.net"));
    }

    #[test]
    fn smtp_diagnostic_before_free_text() {
        let result = analyze(concat!(
            "Subject: failure notice\n",
            "\n",
            "Summary: 4.4.7 and more\n",
            "<user@example.org>: host mx1.example.org[62.94.82.91] said:\n",
            "    554 5.7.1 <kyle.greenpeace.org[194.0.197.22]>: Client host rejected\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
        assert_eq!(result.bounce_recipient(), Some("user@example.org"));
    }

    #[test]
    fn free_text_code_with_recipient_on_line() {
        let result = analyze(concat!(
            "Subject: Delivery report\n",
            "\n",
            "user@example.org; Failed; 4.2.2 (mailbox full)\n",
            "\n",
            "SMTP diagnostic: 552 RCPT TO:<masked@example.net> Mailbox disk quota exceeded\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(4, 2, 2)));
        assert_eq!(result.bounce_recipient(), Some("user@example.org"));
    }

    #[test]
    fn bare_reply_code_gives_generic_class() {
        let result = analyze(concat!(
            "Subject: Returned mail\n",
            "\n",
            "Remote host said: 552 Mailbox disk quota exceeded for jane@example.com\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::PERMANENT));
        assert_eq!(result.bounce_recipient(), Some("jane@example.com"));
    }

    #[test]
    fn ignores_ip_addresses_and_versions() {
        let result = analyze(concat!(
            "Subject: hello\n",
            "\n",
            "Server 5.4.3.2 runs Postfix 2.10.1 and 4.5.6.7 is its peer.\n"
        ));
        assert_eq!(result.bounce_status_code(), None);
        assert_eq!(result.bounce_recipient(), None);
    }

    #[test]
    fn inline_status_and_recipient_fields() {
        let result = analyze(concat!(
            "Subject: Undeliverable\n",
            "\n",
            "Diagnostic: 550 5.7.1 blocked\n",
            "Final-Recipient: RFC822; <bob@example.com>\n",
            "Status: 5.2.1\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 2, 1)));
        assert_eq!(result.bounce_recipient(), Some("bob@example.com"));
    }

    #[test]
    fn x_failed_recipients_header() {
        let result = analyze(concat!(
            "X-Failed-Recipients: gone@example.com\n",
            "Subject: Mail delivery failed\n",
            "\n",
            "SMTP error from remote mail server after RCPT TO:\n",
            "550 5.1.1 No such user here\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
        assert_eq!(result.bounce_recipient(), Some("gone@example.com"));
    }

    #[test]
    fn returned_original_is_ignored() {
        let result = analyze(concat!(
            "Subject: failure notice\n",
            "\n",
            "Sorry, it did not work out.\n",
            "--- Below this line is a copy of the message.\n",
            "\n",
            "Status: 5.1.1\n"
        ));
        assert_eq!(result.bounce_status_code(), None);
    }

    #[test]
    fn conversational_mail_yields_nothing() {
        for raw in [
            concat!(
                "From: Alice <alice@example.com>\n",
                "Subject: Lunch and the upgrade\n",
                "\n",
                "I upgraded the server to version 5.1.1 yesterday, ping carol@example.net\n"
            ),
            concat!(
                "From: Bob <bob@example.com>\n",
                "Subject: Party\n",
                "\n",
                "Guests: 450 confirmed, RSVP to dave@example.com\n"
            ),
        ] {
            let result = analyze(raw);
            assert_eq!(result.bounce_status_code(), None, "{raw:?}");
            assert_eq!(result.bounce_recipient(), None, "{raw:?}");
            assert!(!result.is_bounce(), "{raw:?}");
        }
    }

    #[test]
    fn status_field_counts_in_any_message() {
        let result = analyze(concat!(
            "Subject: Fwd: what happened?\n",
            "\n",
            "Status: 5.2.2 for <full@example.com>\n",
            "The mailbox is over quota.\n"
        ));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 2, 2)));
        assert_eq!(result.bounce_recipient(), Some("full@example.com"));
    }

    #[test]
    fn does_not_override_existing_specific_code() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::new(5, 7, 1));
        StatusCodeAnalyzer::new()
            .analyze(
                &Message::parse("Subject: x\n\n550 5.1.1 unknown user\n"),
                &mut result,
            )
            .unwrap();
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
    }
}
