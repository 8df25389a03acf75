//! Human-readable bounce explanations.

use super::text::{cut_at_original, looks_like_bounce};
use super::{AnalyzerError, MessageAnalyzer};
use crate::result::AnalyzerResult;
use bounceledger_mime::Message;
use tracing::debug;

/// Extracts the human-readable explanation from a bounce.
///
/// For `multipart/report` messages the explanation is the first
/// `text/plain` part. Other messages must first be recognised as bounces by
/// their sender, subject or body, and then contribute their text up to the
/// copy of the original message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptionAnalyzer;

impl DescriptionAnalyzer {
    /// Creates the analyzer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MessageAnalyzer for DescriptionAnalyzer {
    fn id(&self) -> &str {
        "description"
    }

    fn analyze(&self, message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        let content_type = message.content_type();

        let reason = if content_type.is("multipart", "report") {
            message
                .root()
                .find_text_part()
                .map(|part| part.decoded_text().trim().to_string())
        } else if looks_like_bounce(message) {
            let text = message.text_part().unwrap_or_else(|| message.decoded_text());
            Some(cut_at_original(&text).trim().to_string())
        } else {
            debug!("Message does not look like a bounce");
            None
        };

        if let Some(reason) = reason {
            if result.set_bounce_reason(reason) {
                debug!("Stored bounce reason");
            }
        }

        Ok(())
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

    fn reason(raw: &str) -> Option<String> {
        let mut result = AnalyzerResult::new();
        DescriptionAnalyzer::new()
            .analyze(&Message::parse(raw), &mut result)
            .unwrap();
        result.bounce_reason().map(str::to_string)
    }

    #[test]
    fn report_uses_first_text_part() {
        let raw = concat!(
            "Content-Type: multipart/report; report-type=delivery-status; boundary=b\n",
            "\n",
            "--b\n",
            "Content-Type: text/plain; charset=us-ascii\n",
            "\n",
            "\n",
            "  Mailbox full  \n",
            "\n",
            "--b\n",
            "Content-Type: message/delivery-status\n",
            "\n",
            "Status: 4.2.2\n",
            "--b--\n"
        );
        assert_eq!(reason(raw).as_deref(), Some("Mailbox full"));
    }

    #[test]
    fn ordinary_mail_has_no_reason() {
        let raw = concat!(
            "From: Alice <alice@example.com>\n",
            "To: bob@example.com\n",
            "Subject: Lunch tomorrow?\n",
            "\n",
            "Are you free at noon?\n"
        );
        assert_eq!(reason(raw), None);
    }

    #[test]
    fn daemon_sender_marks_bounce() {
        let raw = concat!(
            "From: MAILER-DAEMON@mx.example.com\n",
            "Subject: Notice\n",
            "\n",
            "Your mail to jane@example.org was rejected.\n",
            "\n",
            "------ This is a copy of the message, including all the headers.\n",
            "Subject: secret\n"
        );
        assert_eq!(
            reason(raw).as_deref(),
            Some("Your mail to jane@example.org was rejected.")
        );
    }

    #[test]
    fn subject_marks_bounce() {
        let raw = concat!(
            "From: Mail Delivery System <system@example.com>\n",
            "Subject: Undelivered Mail Returned to Sender\n",
            "\n",
            "  The mailbox is unavailable.\n"
        );
        assert_eq!(reason(raw).as_deref(), Some("The mailbox is unavailable."));
    }

    #[test]
    fn body_marker_marks_bounce() {
        let raw = concat!(
            "From: robot@example.com\n",
            "Subject: Re: your request\n",
            "\n",
            "This is the qmail-send program at example.com.\n",
            "I'm afraid I wasn't able to deliver your message.\n"
        );
        assert!(reason(raw).unwrap().starts_with("This is the qmail-send program"));
    }

    #[test]
    fn encoded_body_is_decoded() {
        let raw = concat!(
            "From: Postmaster <postmaster@example.com>\n",
            "Subject: DELIVERY FAILURE\n",
            "Content-Transfer-Encoding: base64\n",
            "\n",
            "VXNlciB1bmtub3du\n"
        );
        assert_eq!(reason(raw).as_deref(), Some("User unknown"));
    }

    #[test]
    fn existing_reason_is_kept() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_reason("earlier");
        DescriptionAnalyzer::new()
            .analyze(
                &Message::parse("Subject: Delivery failure\n\nlater text\n"),
                &mut result,
            )
            .unwrap();
        assert_eq!(result.bounce_reason(), Some("earlier"));
    }
}
