//! Pipeline configuration.
//!
//! Configuration is stored as JSON, by default in
//! `<config dir>/bounceledger/config.json`. Every field is optional; missing
//! fields take their default value.
//!
//! ```
//! use bounceledger_core::{AnalyzerKind, Config, DsnStatus};
//!
//! let config = Config::builder()
//!     .return_path("bounces@example.com")
//!     .verp(true)
//!     .default_status(DsnStatus::TRANSIENT)
//!     .build();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.analyzers[0], AnalyzerKind::Verp);
//! ```

use crate::analyzer::{NoopClassifier, SignatureClassifier, StatusClassifier};
use crate::dsn::DsnStatus;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Built-in analyzers that can be named in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    /// VERP recipient decoding.
    Verp,
    /// Heuristic status code extraction.
    StatusCode,
    /// Bounce explanation extraction.
    Description,
    /// Signature classifier adapter.
    Classifier,
}

impl AnalyzerKind {
    /// Identifier used in configuration files and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verp => "verp",
            Self::StatusCode => "status_code",
            Self::Description => "description",
            Self::Classifier => "classifier",
        }
    }
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier wired behind the classifier analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Recognises nothing; the classifier analyzer always stores its default.
    None,
    /// Built-in phrase signatures.
    #[default]
    Signature,
}

impl ClassifierKind {
    /// Creates the classifier.
    #[must_use]
    pub fn build(self) -> Box<dyn StatusClassifier> {
        match self {
            Self::None => Box::new(NoopClassifier),
            Self::Signature => Box::new(SignatureClassifier::new()),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Return path used for outgoing mail, such as `bounces@example.com`.
    pub return_path: Option<String>,
    /// Whether outgoing mail uses VERP return paths built from
    /// `return_path`.
    pub verp: bool,
    /// Analyzers to run, in order.
    pub analyzers: Vec<AnalyzerKind>,
    /// Classifier used by the classifier analyzer.
    pub classifier: ClassifierKind,
    /// Code stored by the classifier analyzer when the classifier gives no
    /// usable answer.
    pub default_status: DsnStatus,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            return_path: None,
            verp: false,
            analyzers: vec![
                AnalyzerKind::Verp,
                AnalyzerKind::StatusCode,
                AnalyzerKind::Description,
                AnalyzerKind::Classifier,
            ],
            classifier: ClassifierKind::default(),
            default_status: DsnStatus::SUCCESS,
        }
    }
}

impl Config {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Gets the default configuration file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bounceledger")
            .join("config.json")
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the configuration is
    /// invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// configuration is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Loads the configuration from [`Config::default_path`], or returns the
    /// defaults when no file exists there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(return_path) = &self.return_path {
            validate_return_path(return_path)?;
        } else if self.verp {
            return Err(ConfigError::VerpWithoutReturnPath);
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.analyzers.iter().find(|kind| !seen.insert(**kind)) {
            return Err(ConfigError::DuplicateAnalyzer(*duplicate));
        }

        Ok(())
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a builder holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the return path.
    #[must_use]
    pub fn return_path(mut self, return_path: impl Into<String>) -> Self {
        self.config.return_path = Some(return_path.into());
        self
    }

    /// Enables or disables VERP decoding.
    #[must_use]
    pub const fn verp(mut self, verp: bool) -> Self {
        self.config.verp = verp;
        self
    }

    /// Sets the analyzer order.
    #[must_use]
    pub fn analyzers(mut self, analyzers: impl IntoIterator<Item = AnalyzerKind>) -> Self {
        self.config.analyzers = analyzers.into_iter().collect();
        self
    }

    /// Sets the classifier.
    #[must_use]
    pub const fn classifier(mut self, classifier: ClassifierKind) -> Self {
        self.config.classifier = classifier;
        self
    }

    /// Sets the classifier fallback code.
    #[must_use]
    pub const fn default_status(mut self, status: DsnStatus) -> Self {
        self.config.default_status = status;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The return path is not a plain email address.
    #[error("invalid return path {0:?}: expected an address such as bounces@example.com")]
    InvalidReturnPath(String),
    /// The return path already contains the VERP separator.
    #[error("return path {0:?} must not contain '+'")]
    ReturnPathWithPlus(String),
    /// VERP is enabled but no return path is set.
    #[error("VERP requires a return path")]
    VerpWithoutReturnPath,
    /// An analyzer is listed twice.
    #[error("analyzer {0} is listed more than once")]
    DuplicateAnalyzer(AnalyzerKind),
}

impl ConfigError {
    /// Gets a human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::InvalidReturnPath(_) => "Return path must be an email address",
            Self::ReturnPathWithPlus(_) => "Return path must not contain '+'",
            Self::VerpWithoutReturnPath => "VERP requires a return path",
            Self::DuplicateAnalyzer(_) => "Each analyzer may be listed only once",
        }
    }

    /// Gets the configuration field this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidReturnPath(_) | Self::ReturnPathWithPlus(_) => "return_path",
            Self::VerpWithoutReturnPath => "verp",
            Self::DuplicateAnalyzer(_) => "analyzers",
        }
    }
}

/// Checks a return path and splits it into local part and domain.
pub(crate) fn validate_return_path(
    return_path: &str,
) -> std::result::Result<(&str, &str), ConfigError> {
    let trimmed = return_path.trim();
    let invalid = || ConfigError::InvalidReturnPath(return_path.to_string());

    let (local, domain) = trimmed.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || trimmed.chars().any(char::is_whitespace)
        || !domain.contains('.')
        || domain.split('.').any(str::is_empty)
    {
        return Err(invalid());
    }
    if local.contains('+') {
        return Err(ConfigError::ReturnPathWithPlus(return_path.to_string()));
    }

    Ok((local, domain))
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
    use crate::error::Error;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.return_path, None);
        assert!(!config.verp);
        assert_eq!(
            config.analyzers,
            vec![
                AnalyzerKind::Verp,
                AnalyzerKind::StatusCode,
                AnalyzerKind::Description,
                AnalyzerKind::Classifier,
            ]
        );
        assert_eq!(config.classifier, ClassifierKind::Signature);
        assert_eq!(config.default_status, DsnStatus::SUCCESS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_gives_defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn parses_json() {
        let config = Config::from_json(
            r#"{
                "return_path": "bounces@example.com",
                "verp": true,
                "analyzers": ["status_code", "classifier"],
                "classifier": "none",
                "default_status": "4.0.0"
            }"#,
        )
        .unwrap();
        assert_eq!(config.return_path.as_deref(), Some("bounces@example.com"));
        assert!(config.verp);
        assert_eq!(
            config.analyzers,
            vec![AnalyzerKind::StatusCode, AnalyzerKind::Classifier]
        );
        assert_eq!(config.classifier, ClassifierKind::None);
        assert_eq!(config.default_status, DsnStatus::TRANSIENT);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            Config::from_json(r#"{"default_status": "5.x"}"#),
            Err(Error::Serde(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"analyzers": ["nope"]}"#),
            Err(Error::Serde(_))
        ));
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            Config::from_json(r#"{"verp": true}"#),
            Err(Error::Config(ConfigError::VerpWithoutReturnPath))
        ));
    }

    #[test]
    fn validate_return_path_rules() {
        assert_eq!(
            validate_return_path(" bounces@example.com ").unwrap(),
            ("bounces", "example.com")
        );
        for bad in [
            "",
            "bounces",
            "@example.com",
            "bounces@",
            "bounces@example",
            "a b@example.com",
            "a@b@example.com",
        ] {
            let err = validate_return_path(bad).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidReturnPath(_)), "{bad}");
            assert_eq!(err.field(), "return_path");
        }
        assert!(matches!(
            validate_return_path("bounces+x@example.com"),
            Err(ConfigError::ReturnPathWithPlus(_))
        ));
    }

    #[test]
    fn duplicate_analyzer() {
        let config = Config::builder()
            .analyzers([AnalyzerKind::StatusCode, AnalyzerKind::StatusCode])
            .build();
        let err = config.validate().unwrap_err();
        assert_eq!(err, ConfigError::DuplicateAnalyzer(AnalyzerKind::StatusCode));
        assert_eq!(err.field(), "analyzers");
        assert_eq!(err.message(), "Each analyzer may be listed only once");
    }

    #[test]
    fn builder() {
        let config = Config::builder()
            .return_path("bounces@example.com")
            .verp(true)
            .classifier(ClassifierKind::None)
            .default_status(DsnStatus::PERMANENT)
            .build();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_status, DsnStatus::PERMANENT);
    }

    #[test]
    fn serializes_round_trip() {
        let config = Config::builder()
            .return_path("bounces@example.com")
            .verp(true)
            .build();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""default_status":"2.0.0""#));
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/bounceledger/config.json"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn default_path_ends_with_config_file() {
        let path = Config::default_path();
        assert!(path.ends_with("bounceledger/config.json"));
    }
}
