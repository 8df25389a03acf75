//! Analyzer results.
//!
//! An [`AnalyzerResult`] collects the facts that analyzers find while a
//! message travels through the pipeline. Every property is write-once: the
//! first analyzer to set it wins, later writes are ignored. The single
//! exception is a generic status code (`X.0.0`), whose subject and detail may
//! be filled in later while the class is kept.

use crate::dsn::DsnStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Facts collected about one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalyzerResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    bounce_recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounce_status_code: Option<DsnStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounce_reason: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

impl AnalyzerResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the recipient whose delivery failed.
    ///
    /// Returns true if the value was stored. Empty values are ignored so
    /// that they cannot block a later analyzer.
    pub fn set_bounce_recipient(&mut self, recipient: impl Into<String>) -> bool {
        set_once("bounce_recipient", &mut self.bounce_recipient, recipient.into())
    }

    /// Sets the delivery status code.
    ///
    /// The first code is stored as is. If the stored code is generic
    /// (`X.0.0`), a later call replaces its subject and detail with the
    /// incoming ones while keeping the stored class. Once a non-generic code
    /// is stored it never changes.
    ///
    /// Returns true if the stored code changed.
    pub fn set_bounce_status_code(&mut self, code: DsnStatus) -> bool {
        match self.bounce_status_code {
            None => {
                trace!(%code, "Storing bounce status code");
                self.bounce_status_code = Some(code);
                true
            }
            Some(current) if current.is_generic() => {
                let refined = DsnStatus::new(current.class(), code.subject(), code.detail());
                if refined == current {
                    return false;
                }
                trace!(%current, %refined, "Refining generic bounce status code");
                self.bounce_status_code = Some(refined);
                true
            }
            Some(_) => false,
        }
    }

    /// Sets the human-readable explanation of the bounce.
    ///
    /// Returns true if the value was stored. Blank text is ignored.
    pub fn set_bounce_reason(&mut self, reason: impl Into<String>) -> bool {
        set_once("bounce_reason", &mut self.bounce_reason, reason.into())
    }

    /// Sets an analyzer-specific property.
    ///
    /// Returns true if the property was stored, false if it had already been
    /// set.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.properties.contains_key(&key) {
            return false;
        }
        trace!(%key, "Storing analyzer property");
        self.properties.insert(key, value.into());
        true
    }

    /// Gets the recipient whose delivery failed.
    #[must_use]
    pub fn bounce_recipient(&self) -> Option<&str> {
        self.bounce_recipient.as_deref()
    }

    /// Gets the delivery status code.
    #[must_use]
    pub const fn bounce_status_code(&self) -> Option<DsnStatus> {
        self.bounce_status_code
    }

    /// Gets the explanation of the bounce.
    #[must_use]
    pub fn bounce_reason(&self) -> Option<&str> {
        self.bounce_reason.as_deref()
    }

    /// Gets an analyzer-specific property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Iterates over analyzer-specific properties, sorted by key.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if the message looks like a bounce: a non-success status
    /// code was found, or a bounce explanation was extracted.
    #[must_use]
    pub fn is_bounce(&self) -> bool {
        self.bounce_status_code.is_some_and(|code| !code.is_success())
            || self.bounce_reason.is_some()
    }
}

fn set_once(name: &str, slot: &mut Option<String>, value: String) -> bool {
    if slot.is_some() || value.trim().is_empty() {
        return false;
    }
    trace!(property = name, "Storing bounce property");
    *slot = Some(value);
    true
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

    #[test]
    fn empty_result_reads_none() {
        let result = AnalyzerResult::new();
        assert_eq!(result.bounce_recipient(), None);
        assert_eq!(result.bounce_status_code(), None);
        assert_eq!(result.bounce_reason(), None);
        assert_eq!(result.get("anything"), None);
        assert!(!result.is_bounce());
    }

    #[test]
    fn recipient_is_write_once() {
        let mut result = AnalyzerResult::new();
        assert!(result.set_bounce_recipient("first@example.com"));
        assert!(!result.set_bounce_recipient("second@example.com"));
        assert_eq!(result.bounce_recipient(), Some("first@example.com"));
    }

    #[test]
    fn reason_is_write_once() {
        let mut result = AnalyzerResult::new();
        assert!(result.set_bounce_reason("Mailbox full"));
        assert!(!result.set_bounce_reason("User unknown"));
        assert_eq!(result.bounce_reason(), Some("Mailbox full"));
    }

    #[test]
    fn blank_values_do_not_claim_the_slot() {
        let mut result = AnalyzerResult::new();
        assert!(!result.set_bounce_reason("  \n"));
        assert!(!result.set_bounce_recipient(""));
        assert_eq!(result.bounce_reason(), None);
        assert!(result.set_bounce_reason("real reason"));
        assert!(result.set_bounce_recipient("user@example.com"));
    }

    #[test]
    fn generic_code_is_refined() {
        let mut result = AnalyzerResult::new();
        assert!(result.set_bounce_status_code(DsnStatus::PERMANENT));
        assert!(result.set_bounce_status_code(DsnStatus::new(5, 7, 1)));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
    }

    #[test]
    fn refinement_keeps_stored_class() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::SUCCESS);
        result.set_bounce_status_code(DsnStatus::new(5, 1, 1));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(2, 1, 1)));
    }

    #[test]
    fn specific_code_is_permanent() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::new(5, 7, 1));
        assert!(!result.set_bounce_status_code(DsnStatus::new(5, 1, 1)));
        assert!(!result.set_bounce_status_code(DsnStatus::PERMANENT));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
    }

    #[test]
    fn refinement_happens_once() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::TRANSIENT);
        result.set_bounce_status_code(DsnStatus::new(4, 2, 2));
        assert!(!result.set_bounce_status_code(DsnStatus::new(4, 4, 7)));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(4, 2, 2)));
    }

    #[test]
    fn generic_over_generic_is_a_noop() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::PERMANENT);
        assert!(!result.set_bounce_status_code(DsnStatus::TRANSIENT));
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::PERMANENT));
    }

    #[test]
    fn extension_properties_are_write_once() {
        let mut result = AnalyzerResult::new();
        assert!(result.set("verp.return_path", "bounces@example.com"));
        assert!(!result.set("verp.return_path", "other@example.com"));
        assert_eq!(result.get("verp.return_path"), Some("bounces@example.com"));
        assert_eq!(result.properties().count(), 1);
    }

    #[test]
    fn is_bounce() {
        let mut success = AnalyzerResult::new();
        success.set_bounce_status_code(DsnStatus::SUCCESS);
        assert!(!success.is_bounce());

        let mut failed = AnalyzerResult::new();
        failed.set_bounce_status_code(DsnStatus::new(5, 1, 1));
        assert!(failed.is_bounce());

        let mut described = AnalyzerResult::new();
        described.set_bounce_reason("Delivery failed");
        assert!(described.is_bounce());
    }

    #[test]
    fn serializes_only_present_fields() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::new(5, 1, 1));
        result.set_bounce_recipient("user@example.com");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "bounce_recipient": "user@example.com",
                "bounce_status_code": "5.1.1",
            })
        );
    }
}
