//! Phrase-signature classifier.
//!
//! Recognises bounces by the stock phrases that common MTAs put into their
//! reports. Signatures are tried in table order; the first match decides.
//! Phrases are only consulted once the message looks like a bounce.

use super::classifier::{ClassifierError, StatusClassifier};
use super::text::looks_like_bounce;
use crate::dsn::DsnStatus;
use bounceledger_mime::Message;
use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

#[allow(clippy::expect_used)] // literal pattern
static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*status:[ \t]*([245]\.[0-9]{1,3}\.[0-9]{1,3})\b").expect("valid regex")
});

const SIGNATURES: &[(&str, DsnStatus)] = &[
    (
        r"(?i)(over ?quota|quota exceeded|mailbox (?:is )?full|mailbox size limit|insufficient (?:disk )?space|disk full)",
        DsnStatus::new(4, 2, 2),
    ),
    (
        r"(?i)(user unknown|unknown user|no such (?:user|mailbox|recipient)|not listed in (?:domino directory|public name & address book)|recipient (?:address )?rejected|mailbox (?:unavailable|not found|does not exist)|invalid (?:recipient|mailbox)|address (?:does not exist|unknown)|account (?:does not exist|not found))",
        DsnStatus::new(5, 1, 1),
    ),
    (
        r"(?i)(host (?:or domain name )?not found|domain (?:not found|does not exist)|no (?:mx|mail exchanger) (?:record|host)|unrouteable (?:address|domain)|name service error)",
        DsnStatus::new(5, 1, 2),
    ),
    (
        r"(?i)(account (?:is )?(?:disabled|inactive|suspended|expired)|mailbox (?:is )?(?:disabled|inactive|suspended))",
        DsnStatus::new(5, 2, 1),
    ),
    (
        r"(?i)(message (?:is )?too (?:large|big)|exceeds (?:the )?(?:maximum )?(?:message )?size|size limit exceeded)",
        DsnStatus::new(5, 3, 4),
    ),
    (
        r"(?i)(relay(?:ing)? (?:access )?denied|relaying not permitted|access denied|client host rejected|blocked by (?:policy|spam filter)|rejected (?:for policy reasons|as spam))",
        DsnStatus::new(5, 7, 1),
    ),
    (
        r"(?i)(timed? ?out|connection timeout|delivery time expired|retry time(?:out)? (?:not reached|exceeded))",
        DsnStatus::new(4, 4, 7),
    ),
    (
        r"(?i)(try again later|temporar(?:il)?y (?:failure|unavailable|rejected|deferred)|greylist)",
        DsnStatus::new(4, 0, 0),
    ),
];

#[allow(clippy::expect_used)] // literal patterns
static COMPILED: LazyLock<Vec<(Regex, DsnStatus)>> = LazyLock::new(|| {
    SIGNATURES
        .iter()
        .map(|(pattern, status)| (Regex::new(pattern).expect("valid regex"), *status))
        .collect()
});

/// Classifies bounces by well-known report phrases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureClassifier;

impl SignatureClassifier {
    /// Creates the classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StatusClassifier for SignatureClassifier {
    fn classify(&self, raw: &[u8]) -> Result<String, ClassifierError> {
        if let Some(caps) = STATUS_LINE.captures(&String::from_utf8_lossy(raw)) {
            if let Some(code) = caps.get(1) {
                trace!(code = code.as_str(), "Status line signature");
                return Ok(code.as_str().to_string());
            }
        }

        let message = Message::parse(raw);
        if !looks_like_bounce(&message) {
            trace!("Not a bounce, phrase signatures skipped");
            return Err(ClassifierError::Unrecognized);
        }

        let mut text = message.decoded_subject().unwrap_or_default();
        for part in message.walk().filter(|part| part.content_type().is_text()) {
            text.push('\n');
            text.push_str(&part.decoded_text());
        }

        COMPILED
            .iter()
            .find(|(pattern, _)| pattern.is_match(&text))
            .map(|(pattern, status)| {
                trace!(%status, pattern = pattern.as_str(), "Phrase signature");
                status.to_string()
            })
            .ok_or(ClassifierError::Unrecognized)
    }
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

    fn classify(raw: &str) -> Result<String, ClassifierError> {
        SignatureClassifier::new().classify(raw.as_bytes())
    }

    #[test]
    fn every_signature_compiles() {
        assert_eq!(COMPILED.len(), SIGNATURES.len());
    }

    #[test]
    fn status_line_wins() {
        let raw = "Subject: x\n\nmailbox full\nStatus: 5.1.1\n";
        assert_eq!(classify(raw).unwrap(), "5.1.1");
    }

    #[test]
    fn phrases() {
        let cases = [
            ("Mailbox disk quota exceeded", "4.2.2"),
            ("User environment not listed in Domino Directory", "5.1.1"),
            ("Host or domain name not found", "5.1.2"),
            ("This account is disabled", "5.2.1"),
            ("Message too large for recipient", "5.3.4"),
            ("Client host rejected: Access denied", "5.7.1"),
            ("Connection timed out", "4.4.7"),
            ("Please try again later", "4.0.0"),
        ];
        for (phrase, code) in cases {
            let raw = format!("Subject: Delivery failure\n\n{phrase}\n");
            assert_eq!(classify(&raw).unwrap(), code, "{phrase}");
        }
    }

    #[test]
    fn subject_is_searched() {
        let raw = "Subject: DELIVERY FAILURE: User unknown\n\nSee attachment.\n";
        assert_eq!(classify(raw).unwrap(), "5.1.1");
    }

    #[test]
    fn base64_body_is_decoded() {
        let raw = concat!(
            "Subject: Undeliverable: Notice\n",
            "Content-Transfer-Encoding: base64\n",
            "\n",
            "VXNlciB1bmtub3du\n"
        );
        assert_eq!(classify(raw).unwrap(), "5.1.1");
    }

    #[test]
    fn ordinary_mail_is_unrecognized() {
        let raw = "From: alice@example.com\nSubject: Lunch\n\nSee you at noon.\n";
        assert_eq!(classify(raw), Err(ClassifierError::Unrecognized));
    }

    #[test]
    fn phrases_in_ordinary_mail_are_ignored() {
        for raw in [
            "From: alice@example.com\nSubject: Printer\n\nThe printer is busy, try again later.\n",
            "From: bob@example.com\nSubject: Photos\n\nMy mailbox is full of your photos!\n",
        ] {
            assert_eq!(classify(raw), Err(ClassifierError::Unrecognized), "{raw:?}");
        }
    }
}
