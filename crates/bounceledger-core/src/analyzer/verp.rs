//! VERP recipient decoding.
//!
//! With Variable Envelope Return Paths, every outgoing message carries a
//! return path of the form `bounces+user=example.org@example.com`. A bounce
//! delivered back to that address identifies the failed recipient
//! regardless of what the report says.

use super::text::find_address;
use super::{AnalyzerError, MessageAnalyzer};
use crate::config::{ConfigError, validate_return_path};
use crate::result::AnalyzerResult;
use bounceledger_mime::Message;
use tracing::debug;

/// Headers that may carry the envelope recipient of the bounce, most
/// reliable first.
const ENVELOPE_HEADERS: &[&str] = &["delivered-to", "envelope-to", "x-original-to", "to"];

/// Decodes the failed recipient from a VERP return address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerpAnalyzer {
    local: String,
    domain: String,
}

impl VerpAnalyzer {
    /// Creates an analyzer for the given return path, such as
    /// `bounces@example.com`.
    ///
    /// # Errors
    ///
    /// Returns an error if the return path is not a plain address or already
    /// contains a `+`.
    pub fn new(return_path: &str) -> Result<Self, ConfigError> {
        let (local, domain) = validate_return_path(return_path)?;
        Ok(Self {
            local: local.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// Gets the configured return path.
    #[must_use]
    pub fn return_path(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// Decodes a VERP address back to the original recipient.
    ///
    /// Returns `None` if the address was not built from this return path.
    #[must_use]
    pub fn decode(&self, address: &str) -> Option<String> {
        let (local, domain) = address.trim().rsplit_once('@')?;
        if !domain.eq_ignore_ascii_case(&self.domain) {
            return None;
        }
        let (prefix, encoded) = local.split_once('+')?;
        if prefix != self.local {
            return None;
        }
        let (user, user_domain) = encoded.rsplit_once('=')?;
        if user.is_empty() || user_domain.is_empty() {
            return None;
        }
        Some(format!("{user}@{user_domain}"))
    }
}

impl MessageAnalyzer for VerpAnalyzer {
    fn id(&self) -> &str {
        "verp"
    }

    fn analyze(&self, message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        let found = ENVELOPE_HEADERS.iter().find_map(|name| {
            message
                .headers()
                .get_all(name)
                .into_iter()
                .filter_map(find_address)
                .find_map(|address| {
                    self.decode(address)
                        .map(|recipient| (address.to_string(), recipient))
                })
        });

        let Some((address, recipient)) = found else {
            debug!("No VERP address in envelope headers");
            return Ok(());
        };

        debug!(%address, %recipient, "Decoded VERP address");
        result.set("verp.address", address);
        result.set_bounce_recipient(recipient);
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

    fn analyzer() -> VerpAnalyzer {
        VerpAnalyzer::new("bounces@example.com").unwrap()
    }

    #[test]
    fn rejects_bad_return_paths() {
        assert!(matches!(
            VerpAnalyzer::new("bounces+x@example.com"),
            Err(ConfigError::ReturnPathWithPlus(_))
        ));
        assert!(matches!(
            VerpAnalyzer::new("not an address"),
            Err(ConfigError::InvalidReturnPath(_))
        ));
    }

    #[test]
    fn decode() {
        let verp = analyzer();
        assert_eq!(verp.return_path(), "bounces@example.com");
        assert_eq!(
            verp.decode("bounces+user=example.org@example.com").as_deref(),
            Some("user@example.org")
        );
        assert_eq!(
            verp.decode("bounces+user=example.org@EXAMPLE.com").as_deref(),
            Some("user@example.org")
        );
        assert_eq!(verp.decode("bounces@example.com"), None);
        assert_eq!(verp.decode("other+user=example.org@example.com"), None);
        assert_eq!(verp.decode("bounces+user=example.org@example.net"), None);
        assert_eq!(verp.decode("bounces+nodomain@example.com"), None);
    }

    #[test]
    fn reads_envelope_headers() {
        let raw = concat!(
            "Delivered-To: someone-else@example.com\n",
            "Delivered-To: bounces+jane.doe=example.org@example.com\n",
            "To: <bounces+other=example.net@example.com>\n",
            "Subject: Undelivered Mail\n",
            "\n",
            "Sorry\n"
        );
        let mut result = AnalyzerResult::new();
        analyzer().analyze(&Message::parse(raw), &mut result).unwrap();
        assert_eq!(result.bounce_recipient(), Some("jane.doe@example.org"));
        assert_eq!(
            result.get("verp.address"),
            Some("bounces+jane.doe=example.org@example.com")
        );
    }

    #[test]
    fn falls_back_to_to_header() {
        let raw = "To: Bounces <bounces+bob=example.net@example.com>\n\nSorry\n";
        let mut result = AnalyzerResult::new();
        analyzer().analyze(&Message::parse(raw), &mut result).unwrap();
        assert_eq!(result.bounce_recipient(), Some("bob@example.net"));
    }

    #[test]
    fn unrelated_message_is_untouched() {
        let raw = "To: bob@example.net\nSubject: hi\n\nhello\n";
        let mut result = AnalyzerResult::new();
        analyzer().analyze(&Message::parse(raw), &mut result).unwrap();
        assert_eq!(result, AnalyzerResult::new());
    }
}
