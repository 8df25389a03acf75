//! The analyzer pipeline.
//!
//! A pipeline runs an ordered list of analyzers over one message. Each run
//! starts from an empty [`AnalyzerResult`]; analyzers run one after the other
//! and an analyzer that fails is logged and skipped, keeping whatever it had
//! already recorded.

use crate::analyzer::{
    ClassifierAnalyzer, DescriptionAnalyzer, MessageAnalyzer, StatusClassifier,
    StatusCodeAnalyzer, VerpAnalyzer,
};
use crate::config::{AnalyzerKind, Config, ConfigError};
use crate::result::AnalyzerResult;
use bounceledger_mime::Message;
use tracing::{debug, warn};

/// Runs `analyzers` in order over `message`.
///
/// Never fails. An analyzer error is logged at `warn` level and the chain
/// continues with the next analyzer.
#[must_use]
pub fn run_pipeline(message: &Message, analyzers: &[Box<dyn MessageAnalyzer>]) -> AnalyzerResult {
    let mut result = AnalyzerResult::new();
    for analyzer in analyzers {
        debug!(analyzer = analyzer.id(), "Running analyzer");
        if let Err(e) = analyzer.analyze(message, &mut result) {
            warn!(analyzer = analyzer.id(), "Analyzer failed: {e}");
        }
    }
    result
}

/// An ordered list of analyzers.
#[derive(Default)]
pub struct Pipeline {
    analyzers: Vec<Box<dyn MessageAnalyzer>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the pipeline described by `config`.
    ///
    /// The VERP analyzer is only added when VERP is enabled and a return path
    /// is configured. `classifier` backs the classifier analyzer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(
        config: &Config,
        classifier: Box<dyn StatusClassifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut classifier = Some(classifier);
        let mut pipeline = Self::new();
        for kind in &config.analyzers {
            match kind {
                AnalyzerKind::Verp => match (&config.return_path, config.verp) {
                    (Some(return_path), true) => pipeline.push(VerpAnalyzer::new(return_path)?),
                    _ => debug!("VERP disabled, skipping analyzer"),
                },
                AnalyzerKind::StatusCode => pipeline.push(StatusCodeAnalyzer::new()),
                AnalyzerKind::Description => pipeline.push(DescriptionAnalyzer::new()),
                AnalyzerKind::Classifier => {
                    if let Some(classifier) = classifier.take() {
                        pipeline.push(
                            ClassifierAnalyzer::new(classifier)
                                .with_default_status(config.default_status),
                        );
                    }
                }
            }
        }

        debug!(analyzers = ?pipeline.analyzer_ids(), "Pipeline built");
        Ok(pipeline)
    }

    /// Appends an analyzer.
    pub fn push(&mut self, analyzer: impl MessageAnalyzer + 'static) {
        self.analyzers.push(Box::new(analyzer));
    }

    /// Appends an analyzer, builder style.
    #[must_use]
    pub fn with(mut self, analyzer: impl MessageAnalyzer + 'static) -> Self {
        self.push(analyzer);
        self
    }

    /// Gets the analyzer identifiers in run order.
    #[must_use]
    pub fn analyzer_ids(&self) -> Vec<&str> {
        self.analyzers.iter().map(|a| a.id()).collect()
    }

    /// Gets the analyzers in run order.
    #[must_use]
    pub fn analyzers(&self) -> &[Box<dyn MessageAnalyzer>] {
        &self.analyzers
    }

    /// Runs the pipeline over a parsed message.
    #[must_use]
    pub fn run(&self, message: &Message) -> AnalyzerResult {
        run_pipeline(message, &self.analyzers)
    }

    /// Parses raw message bytes and runs the pipeline over them.
    #[must_use]
    pub fn analyze_raw(&self, raw: impl AsRef<[u8]>) -> AnalyzerResult {
        self.run(&Message::parse(raw))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("analyzers", &self.analyzer_ids())
            .finish()
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
    use crate::analyzer::{AnalyzerError, NoopClassifier};
    use crate::config::ClassifierKind;

    #[test]
    fn empty_pipeline_gives_empty_result() {
        let result = Pipeline::new().analyze_raw("Subject: x\n\nbody");
        assert_eq!(result, AnalyzerResult::new());
    }

    #[test]
    fn default_config_without_verp() {
        let pipeline = Pipeline::from_config(&Config::default(), Box::new(NoopClassifier)).unwrap();
        assert_eq!(
            pipeline.analyzer_ids(),
            vec!["status_code", "description", "classifier"]
        );
    }

    #[test]
    fn config_with_verp() {
        let config = Config::builder()
            .return_path("bounces@example.com")
            .verp(true)
            .build();
        let pipeline = Pipeline::from_config(&config, ClassifierKind::Signature.build()).unwrap();
        assert_eq!(
            pipeline.analyzer_ids(),
            vec!["verp", "status_code", "description", "classifier"]
        );
    }

    #[test]
    fn config_order_is_kept() {
        let config = Config::builder()
            .analyzers([AnalyzerKind::Classifier, AnalyzerKind::Description])
            .build();
        let pipeline = Pipeline::from_config(&config, Box::new(NoopClassifier)).unwrap();
        assert_eq!(pipeline.analyzer_ids(), vec!["classifier", "description"]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config::builder().verp(true).build();
        assert_eq!(
            Pipeline::from_config(&config, Box::new(NoopClassifier)).unwrap_err(),
            ConfigError::VerpWithoutReturnPath
        );
    }

    struct Failing;

    impl MessageAnalyzer for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn analyze(
            &self,
            _message: &Message,
            result: &mut AnalyzerResult,
        ) -> Result<(), AnalyzerError> {
            result.set_bounce_reason("partial");
            Err(AnalyzerError::failed("failing", "gave up"))
        }
    }

    #[test]
    fn failure_keeps_partial_writes_and_continues() {
        let pipeline = Pipeline::new()
            .with(Failing)
            .with(ClassifierAnalyzer::new(Box::new(NoopClassifier)));
        let result = pipeline.analyze_raw("Subject: x\n\nbody");
        assert_eq!(result.bounce_reason(), Some("partial"));
        assert_eq!(
            result.bounce_status_code(),
            Some(crate::dsn::DsnStatus::SUCCESS)
        );
    }

    #[test]
    fn pipeline_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }
}
