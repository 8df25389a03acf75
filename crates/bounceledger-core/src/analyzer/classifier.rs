//! Adapter for signature-based bounce classifiers.

use super::{AnalyzerError, MessageAnalyzer};
use crate::dsn::DsnStatus;
use crate::result::AnalyzerResult;
use bounceledger_mime::Message;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;
use tracing::{debug, warn};

/// Error reported by a [`StatusClassifier`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    /// The classifier found nothing it recognises.
    #[error("message not recognized")]
    Unrecognized,

    /// The classifier failed.
    #[error("classifier failed: {0}")]
    Failed(String),
}

/// A classifier that maps a raw message to a dotted status string such as
/// `"5.1.1"`.
pub trait StatusClassifier: Send + Sync {
    /// Classifies the raw message.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Unrecognized`] when no signature matches.
    fn classify(&self, raw: &[u8]) -> Result<String, ClassifierError>;
}

/// A classifier that recognises nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClassifier;

impl StatusClassifier for NoopClassifier {
    fn classify(&self, _raw: &[u8]) -> Result<String, ClassifierError> {
        Err(ClassifierError::Unrecognized)
    }
}

/// Runs a [`StatusClassifier`] and stores its verdict as the status code.
///
/// Whatever goes wrong inside the classifier (an error, a malformed status
/// string or a panic) the configured default code is stored instead.
pub struct ClassifierAnalyzer {
    classifier: Box<dyn StatusClassifier>,
    default_status: DsnStatus,
}

impl ClassifierAnalyzer {
    /// Wraps a classifier, falling back to `2.0.0`.
    #[must_use]
    pub fn new(classifier: Box<dyn StatusClassifier>) -> Self {
        Self {
            classifier,
            default_status: DsnStatus::SUCCESS,
        }
    }

    /// Sets the code stored when the classifier gives no usable answer.
    #[must_use]
    pub fn with_default_status(mut self, status: DsnStatus) -> Self {
        self.default_status = status;
        self
    }

    /// Gets the fallback code.
    #[must_use]
    pub const fn default_status(&self) -> DsnStatus {
        self.default_status
    }

    fn classify(&self, raw: &[u8]) -> DsnStatus {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.classifier.classify(raw)));
        match outcome {
            Ok(Ok(code)) => DsnStatus::parse(&code).unwrap_or_else(|e| {
                warn!(%code, "Classifier returned a malformed status: {e}");
                self.default_status
            }),
            Ok(Err(ClassifierError::Unrecognized)) => {
                debug!("Classifier did not recognize the message");
                self.default_status
            }
            Ok(Err(e)) => {
                warn!("Classifier failed: {e}");
                self.default_status
            }
            Err(_) => {
                warn!("Classifier panicked");
                self.default_status
            }
        }
    }
}

impl std::fmt::Debug for ClassifierAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAnalyzer")
            .field("default_status", &self.default_status)
            .finish_non_exhaustive()
    }
}

impl MessageAnalyzer for ClassifierAnalyzer {
    fn id(&self) -> &str {
        "classifier"
    }

    fn analyze(&self, message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        let status = self.classify(message.raw());
        debug!(code = %status, "Classifier verdict");
        result.set_bounce_status_code(status);
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

    struct Fixed(&'static str);

    impl StatusClassifier for Fixed {
        fn classify(&self, _raw: &[u8]) -> Result<String, ClassifierError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl StatusClassifier for Broken {
        fn classify(&self, _raw: &[u8]) -> Result<String, ClassifierError> {
            Err(ClassifierError::Failed("library exploded".into()))
        }
    }

    struct Panicking;

    impl StatusClassifier for Panicking {
        fn classify(&self, _raw: &[u8]) -> Result<String, ClassifierError> {
            panic!("classifier bug")
        }
    }

    fn run(classifier: Box<dyn StatusClassifier>) -> Option<DsnStatus> {
        let mut result = AnalyzerResult::new();
        ClassifierAnalyzer::new(classifier)
            .analyze(&Message::parse("Subject: x\n\nbody\n"), &mut result)
            .unwrap();
        result.bounce_status_code()
    }

    #[test]
    fn stores_classifier_verdict() {
        assert_eq!(run(Box::new(Fixed("5.1.1"))), Some(DsnStatus::new(5, 1, 1)));
    }

    #[test]
    fn unrecognized_falls_back_to_default() {
        assert_eq!(run(Box::new(NoopClassifier)), Some(DsnStatus::SUCCESS));
    }

    #[test]
    fn failure_falls_back_to_default() {
        assert_eq!(run(Box::new(Broken)), Some(DsnStatus::SUCCESS));
    }

    #[test]
    fn malformed_verdict_falls_back_to_default() {
        assert_eq!(run(Box::new(Fixed("5.x.1"))), Some(DsnStatus::SUCCESS));
        assert_eq!(run(Box::new(Fixed(""))), Some(DsnStatus::SUCCESS));
    }

    #[test]
    fn panic_falls_back_to_default() {
        assert_eq!(run(Box::new(Panicking)), Some(DsnStatus::SUCCESS));
    }

    #[test]
    fn custom_default() {
        let analyzer =
            ClassifierAnalyzer::new(Box::new(NoopClassifier)).with_default_status(DsnStatus::TRANSIENT);
        assert_eq!(analyzer.default_status(), DsnStatus::TRANSIENT);

        let mut result = AnalyzerResult::new();
        analyzer
            .analyze(&Message::parse("body only"), &mut result)
            .unwrap();
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::TRANSIENT));
    }

    #[test]
    fn verdict_refines_generic_code() {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::PERMANENT);
        ClassifierAnalyzer::new(Box::new(Fixed("5.2.2")))
            .analyze(&Message::parse("x"), &mut result)
            .unwrap();
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 2, 2)));
    }
}
