//! Delivery status codes (RFC 3463).
//!
//! A status code is three numbers, `class.subject.detail`. The class says
//! whether delivery succeeded (2), failed transiently (4) or failed
//! permanently (5); subject and detail narrow the cause down.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a status string is not `class.subject.detail`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DsnError {
    /// The input is not three dot-separated non-negative integers.
    #[error("Invalid DSN status code: {0:?}")]
    Format(String),
}

/// An RFC 3463 enhanced status code.
///
/// Immutable. Equality is structural. A code whose subject and detail are
/// both zero (e.g. `5.0.0`) is *generic*: only its class is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DsnStatus {
    class: u32,
    subject: u32,
    detail: u32,
}

impl DsnStatus {
    /// `2.0.0`, delivery succeeded or the outcome is neutral.
    pub const SUCCESS: Self = Self::new(2, 0, 0);
    /// `4.0.0`, unspecified transient failure.
    pub const TRANSIENT: Self = Self::new(4, 0, 0);
    /// `5.0.0`, unspecified permanent failure.
    pub const PERMANENT: Self = Self::new(5, 0, 0);

    /// Creates a status code.
    #[must_use]
    pub const fn new(class: u32, subject: u32, detail: u32) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// Parses a dotted `class.subject.detail` string.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DsnError::Format`] unless the input is exactly three
    /// dot-separated runs of ASCII digits, each fitting a `u32` and without
    /// leading zeros, so that the parsed code prints back as its input.
    pub fn parse(code: &str) -> Result<Self, DsnError> {
        let format_error = || DsnError::Format(code.to_string());

        let mut fields = code.trim().split('.');
        let (Some(class), Some(subject), Some(detail), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(format_error());
        };

        if ![class, subject, detail].into_iter().all(is_canonical_number) {
            return Err(format_error());
        }

        Ok(Self {
            class: class.parse().map_err(|_| format_error())?,
            subject: subject.parse().map_err(|_| format_error())?,
            detail: detail.parse().map_err(|_| format_error())?,
        })
    }

    /// Maps a bare SMTP reply code (e.g. `552`) to a generic status of the
    /// same class. Codes outside the 2xx/4xx/5xx ranges have no mapping.
    #[must_use]
    pub const fn from_reply_code(code: u16) -> Option<Self> {
        match code {
            200..=299 => Some(Self::SUCCESS),
            400..=499 => Some(Self::TRANSIENT),
            500..=599 => Some(Self::PERMANENT),
            _ => None,
        }
    }

    /// Returns the class number.
    #[must_use]
    pub const fn class(&self) -> u32 {
        self.class
    }

    /// Returns the subject number.
    #[must_use]
    pub const fn subject(&self) -> u32 {
        self.subject
    }

    /// Returns the detail number.
    #[must_use]
    pub const fn detail(&self) -> u32 {
        self.detail
    }

    /// Returns true if subject and detail are both zero.
    #[must_use]
    pub const fn is_generic(&self) -> bool {
        self.subject == 0 && self.detail == 0
    }

    /// Returns true if this code refines `other`: same class, this code is
    /// not generic and `other` is.
    #[must_use]
    pub const fn is_more_specific_than(&self, other: &Self) -> bool {
        self.class == other.class && !self.is_generic() && other.is_generic()
    }

    /// Returns true for class 2.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.class == 2
    }

    /// Returns true for class 4.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.class == 4
    }

    /// Returns true for class 5.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.class == 5
    }

    /// Describes the class, e.g. "Permanent Failure".
    #[must_use]
    pub const fn class_label(&self) -> Option<&'static str> {
        match self.class {
            2 => Some("Success"),
            4 => Some("Persistent Transient Failure"),
            5 => Some("Permanent Failure"),
            _ => None,
        }
    }

    /// Describes the subject, e.g. "Mailbox Status".
    #[must_use]
    pub const fn subject_label(&self) -> Option<&'static str> {
        match self.subject {
            0 => Some("Other or Undefined Status"),
            1 => Some("Addressing Status"),
            2 => Some("Mailbox Status"),
            3 => Some("Mail System Status"),
            4 => Some("Network and Routing Status"),
            5 => Some("Mail Delivery Protocol Status"),
            6 => Some("Message Content or Media Status"),
            7 => Some("Security or Policy Status"),
            _ => None,
        }
    }

    /// Describes the subject/detail pair, e.g. "Mailbox full".
    #[must_use]
    pub const fn detail_label(&self) -> Option<&'static str> {
        Some(match (self.subject, self.detail) {
            (0, 0) => "Other undefined Status",
            (1, 0) => "Other address status",
            (1, 1) => "Bad destination mailbox address",
            (1, 2) => "Bad destination system address",
            (1, 3) => "Bad destination mailbox address syntax",
            (1, 4) => "Destination mailbox address ambiguous",
            (1, 5) => "Destination address valid",
            (1, 6) => "Destination mailbox has moved, No forwarding address",
            (1, 7) => "Bad sender's mailbox address syntax",
            (1, 8) => "Bad sender's system address",
            (2, 0) => "Other or undefined mailbox status",
            (2, 1) => "Mailbox disabled, not accepting messages",
            (2, 2) => "Mailbox full",
            (2, 3) => "Message length exceeds administrative limit",
            (2, 4) => "Mailing list expansion problem",
            (3, 0) => "Other or undefined mail system status",
            (3, 1) => "Mail system full",
            (3, 2) => "System not accepting network messages",
            (3, 3) => "System not capable of selected features",
            (3, 4) => "Message too big for system",
            (3, 5) => "System incorrectly configured",
            (4, 0) => "Other or undefined network or routing status",
            (4, 1) => "No answer from host",
            (4, 2) => "Bad connection",
            (4, 3) => "Directory server failure",
            (4, 4) => "Unable to route",
            (4, 5) => "Mail system congestion",
            (4, 6) => "Routing loop detected",
            (4, 7) => "Delivery time expired",
            (5, 0) => "Other or undefined protocol status",
            (5, 1) => "Invalid command",
            (5, 2) => "Syntax error",
            (5, 3) => "Too many recipients",
            (5, 4) => "Invalid command arguments",
            (5, 5) => "Wrong protocol version",
            (6, 0) => "Other or undefined media error",
            (6, 1) => "Media not supported",
            (6, 2) => "Conversion required and prohibited",
            (6, 3) => "Conversion required but not supported",
            (6, 4) => "Conversion with loss performed",
            (6, 5) => "Conversion Failed",
            (7, 0) => "Other or undefined security status",
            (7, 1) => "Delivery not authorized, message refused",
            (7, 2) => "Mailing list expansion prohibited",
            (7, 3) => "Security conversion required but not possible",
            (7, 4) => "Security features not supported",
            (7, 5) => "Cryptographic failure",
            (7, 6) => "Cryptographic algorithm not supported",
            (7, 7) => "Message integrity failure",
            _ => return None,
        })
    }

    /// Human-readable explanation, e.g. "Permanent Failure: Mailbox full".
    ///
    /// Falls back to the subject description when the detail is not a
    /// registered one, and to the bare code for unknown classes.
    #[must_use]
    pub fn label(&self) -> String {
        let Some(class) = self.class_label() else {
            return self.to_string();
        };
        match self.detail_label().or_else(|| self.subject_label()) {
            Some(detail) => format!("{class}: {detail}"),
            None => class.to_string(),
        }
    }
}

/// Non-empty ASCII digits, with no leading zero unless the field is `0`.
fn is_canonical_number(field: &str) -> bool {
    !field.is_empty()
        && field.bytes().all(|b| b.is_ascii_digit())
        && (field == "0" || !field.starts_with('0'))
}

impl fmt::Display for DsnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

impl FromStr for DsnStatus {
    type Err = DsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DsnStatus {
    type Error = DsnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DsnStatus> for String {
    fn from(status: DsnStatus) -> Self {
        status.to_string()
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
    use proptest::prelude::*;

    #[test]
    fn parse_valid() {
        let status = DsnStatus::parse("5.1.1").unwrap();
        assert_eq!(status.class(), 5);
        assert_eq!(status.subject(), 1);
        assert_eq!(status.detail(), 1);
        assert_eq!(status, DsnStatus::new(5, 1, 1));
    }

    #[test]
    fn parse_tolerates_whitespace_and_wide_fields() {
        assert_eq!(DsnStatus::parse(" 4.4.7\r\n").unwrap(), DsnStatus::new(4, 4, 7));
        assert_eq!(
            DsnStatus::parse("5.123.456").unwrap(),
            DsnStatus::new(5, 123, 456)
        );
        assert_eq!(DsnStatus::parse("500.1.1").unwrap().to_string(), "500.1.1");
        assert_eq!(DsnStatus::parse("5.1.70000").unwrap().to_string(), "5.1.70000");
        assert_eq!(DsnStatus::parse("5.0.0").unwrap(), DsnStatus::PERMANENT);
    }

    #[test]
    fn parse_invalid() {
        for input in [
            "", "5", "5.1", "5.1.1.1", "5..1", "a.b.c", "5.1.x", "-5.1.1", "5.+1.1", "5. 1.1",
            "05.1.1", "5.01.1", "5.1.00", "5.1.99999999999",
        ] {
            assert_eq!(
                DsnStatus::parse(input),
                Err(DsnError::Format(input.to_string())),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn from_str_and_display() {
        let status: DsnStatus = "4.2.2".parse().unwrap();
        assert_eq!(status.to_string(), "4.2.2");
    }

    #[test]
    fn generic_codes() {
        assert!(DsnStatus::PERMANENT.is_generic());
        assert!(!DsnStatus::new(5, 0, 1).is_generic());
        assert!(!DsnStatus::new(5, 1, 0).is_generic());
    }

    #[test]
    fn more_specific_than() {
        let specific = DsnStatus::new(5, 7, 1);
        assert!(specific.is_more_specific_than(&DsnStatus::PERMANENT));
        assert!(!DsnStatus::PERMANENT.is_more_specific_than(&specific));
        assert!(!specific.is_more_specific_than(&DsnStatus::TRANSIENT));
        assert!(!specific.is_more_specific_than(&DsnStatus::new(5, 1, 1)));
        assert!(!DsnStatus::PERMANENT.is_more_specific_than(&DsnStatus::PERMANENT));
    }

    #[test]
    fn classes() {
        assert!(DsnStatus::SUCCESS.is_success());
        assert!(DsnStatus::new(4, 2, 2).is_transient());
        assert!(DsnStatus::new(5, 1, 1).is_permanent());
        assert!(!DsnStatus::new(5, 1, 1).is_transient());
    }

    #[test]
    fn from_reply_code() {
        assert_eq!(DsnStatus::from_reply_code(250), Some(DsnStatus::SUCCESS));
        assert_eq!(DsnStatus::from_reply_code(452), Some(DsnStatus::TRANSIENT));
        assert_eq!(DsnStatus::from_reply_code(552), Some(DsnStatus::PERMANENT));
        assert_eq!(DsnStatus::from_reply_code(354), None);
        assert_eq!(DsnStatus::from_reply_code(42), None);
    }

    #[test]
    fn labels() {
        assert_eq!(
            DsnStatus::new(4, 2, 2).label(),
            "Persistent Transient Failure: Mailbox full"
        );
        assert_eq!(
            DsnStatus::new(5, 7, 1).label(),
            "Permanent Failure: Delivery not authorized, message refused"
        );
        assert_eq!(DsnStatus::new(5, 1, 99).label(), "Permanent Failure: Addressing Status");
        assert_eq!(DsnStatus::new(5, 42, 99).label(), "Permanent Failure");
        assert_eq!(DsnStatus::new(3, 1, 1).label(), "3.1.1");
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&DsnStatus::new(5, 1, 1)).unwrap();
        assert_eq!(json, "\"5.1.1\"");
        let status: DsnStatus = serde_json::from_str("\"4.7.0\"").unwrap();
        assert_eq!(status, DsnStatus::new(4, 7, 0));
        assert!(serde_json::from_str::<DsnStatus>("\"bogus\"").is_err());
    }

    proptest! {
        #[test]
        fn canonical_strings_round_trip(class in any::<u32>(), subject in any::<u32>(), detail in any::<u32>()) {
            let text = format!("{class}.{subject}.{detail}");
            prop_assert_eq!(DsnStatus::parse(&text).unwrap().to_string(), text);
        }

        #[test]
        fn leading_zeros_are_rejected(
            fields in (0u32..1000, 0u32..1000, 0u32..1000),
            padded in 0usize..3,
            zeros in 1usize..3,
        ) {
            let mut parts = [fields.0.to_string(), fields.1.to_string(), fields.2.to_string()];
            parts[padded].insert_str(0, &"0".repeat(zeros));
            let text = parts.join(".");
            prop_assert_eq!(DsnStatus::parse(&text), Err(DsnError::Format(text.clone())));
        }

        #[test]
        fn parsed_codes_print_back_unchanged(text in "[0-9]{1,6}\\.[0-9]{1,6}\\.[0-9]{1,6}") {
            if let Ok(status) = DsnStatus::parse(&text) {
                prop_assert_eq!(status.to_string(), text);
            }
        }

        #[test]
        fn malformed_strings_are_rejected(text in "[0-9]{1,3}(\\.[0-9]{1,3}){0,1}|[0-9]{1,3}(\\.[0-9]{1,3}){3,5}|[a-z.]{1,10}") {
            prop_assert!(DsnStatus::parse(&text).is_err());
        }
    }
}
