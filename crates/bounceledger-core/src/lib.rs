//! # bounceledger-core
//!
//! Bounce analysis for `BounceLedger`.
//!
//! This crate provides:
//! - RFC 3463 delivery status codes ([`DsnStatus`])
//! - A write-once result record ([`AnalyzerResult`])
//! - Built-in analyzers: status code heuristics, bounce descriptions,
//!   signature classification and VERP decoding
//! - An ordered, failure-isolating [`Pipeline`]
//! - JSON configuration ([`Config`])
//!
//! ```
//! use bounceledger_core::{DsnStatus, Pipeline, StatusCodeAnalyzer, DescriptionAnalyzer};
//!
//! let pipeline = Pipeline::new()
//!     .with(StatusCodeAnalyzer::new())
//!     .with(DescriptionAnalyzer::new());
//!
//! let result = pipeline.analyze_raw(
//!     "From: MAILER-DAEMON@mx.example.com\r\n\
//!      Subject: Undelivered Mail Returned to Sender\r\n\
//!      \r\n\
//!      <jane@example.org>: host mx.example.org said:\r\n    \
//!      550 5.1.1 User unknown\r\n",
//! );
//! assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
//! assert_eq!(result.bounce_recipient(), Some("jane@example.org"));
//! assert!(result.is_bounce());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod analyzer;
pub mod config;
pub mod dsn;
mod error;
pub mod pipeline;
pub mod result;

pub use analyzer::{
    AnalyzerError, ClassifierAnalyzer, ClassifierError, DescriptionAnalyzer, MessageAnalyzer,
    NoopClassifier, SignatureClassifier, StatusClassifier, StatusCodeAnalyzer, VerpAnalyzer,
};
pub use config::{AnalyzerKind, ClassifierKind, Config, ConfigBuilder, ConfigError};
pub use dsn::{DsnError, DsnStatus};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, run_pipeline};
pub use result::AnalyzerResult;

pub use bounceledger_mime::Message;
