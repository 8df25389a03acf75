//! Message analyzers.
//!
//! An analyzer inspects a parsed message and records what it finds in an
//! [`AnalyzerResult`]. Analyzers run in sequence over the same result, so an
//! analyzer placed earlier in the chain takes precedence for every property
//! it sets.

mod classifier;
mod description;
mod signature;
mod status_code;
pub mod text;
mod verp;

pub use classifier::{ClassifierAnalyzer, ClassifierError, NoopClassifier, StatusClassifier};
pub use description::DescriptionAnalyzer;
pub use signature::SignatureClassifier;
pub use status_code::StatusCodeAnalyzer;
pub use verp::VerpAnalyzer;

use crate::result::AnalyzerResult;
use bounceledger_mime::Message;
use thiserror::Error;

/// Error raised by an analyzer.
///
/// The pipeline logs these and moves on to the next analyzer.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// The analyzer could not process the message.
    #[error("{analyzer}: {message}")]
    Failed {
        /// Identifier of the failing analyzer.
        analyzer: String,
        /// What went wrong.
        message: String,
    },
}

impl AnalyzerError {
    /// Creates a failure for the given analyzer.
    pub fn failed(analyzer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            analyzer: analyzer.into(),
            message: message.into(),
        }
    }
}

/// A step of the analysis pipeline.
pub trait MessageAnalyzer: Send + Sync {
    /// Short identifier used in logs.
    fn id(&self) -> &str;

    /// Inspects the message and records findings in `result`.
    ///
    /// Implementations must not assume they run first: properties already
    /// present in `result` stay as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the analyzer cannot process the message. Any
    /// properties set before the error are kept.
    fn analyze(&self, message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError>;
}

impl<T: MessageAnalyzer + ?Sized> MessageAnalyzer for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn analyze(&self, message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        (**self).analyze(message, result)
    }
}
