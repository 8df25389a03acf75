//! Integration tests for the analyzer pipeline.
//!
//! These run the built-in analyzers over real-world bounce samples stored in
//! `tests/fixtures`.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bounceledger_core::{
    AnalyzerError, AnalyzerResult, ClassifierAnalyzer, ClassifierError, ClassifierKind, Config,
    DescriptionAnalyzer, DsnStatus, Message, MessageAnalyzer, NoopClassifier, Pipeline,
    StatusClassifier, StatusCodeAnalyzer, VerpAnalyzer, run_pipeline,
};

const ACCESS_DENIED_REASON: &str = "This is the Postfix program at host kyle.greenpeace.org.

I'm sorry to have to inform you that your message could not
be delivered to one or more recipients. It's attached below.

For further assistance, please send mail to <postmaster>

If you do so, please include this problem report. You can
delete your own text from the attached returned message.

\t\t\tThe Postfix program

<user@example.org>: host mx1.example.org[62.94.82.91] said:
    554 5.7.1 <kyle.greenpeace.org[194.0.197.22]>: Client host rejected: Access
    denied (in reply to RCPT TO command)";

const FULL_REASON: &str = "- These recipients of your message have been processed by the mail server:
user@example.org; Failed; 4.2.2 (mailbox full)

    Remote MTA ms5.han.skanova.net: SMTP diagnostic: 552 RCPT TO:<masked4@pne.telia.com> Mailbox disk quota exceeded";

fn fixture(name: &str) -> Message {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    Message::parse(std::fs::read(path).unwrap())
}

fn only(analyzer: impl MessageAnalyzer + 'static) -> Pipeline {
    Pipeline::new().with(analyzer)
}

fn default_pipeline() -> Pipeline {
    Pipeline::from_config(&Config::default(), ClassifierKind::Signature.build()).unwrap()
}

/// Classifier returning a fixed verdict.
struct Fixed(&'static str);

impl StatusClassifier for Fixed {
    fn classify(&self, _raw: &[u8]) -> Result<String, ClassifierError> {
        Ok(self.0.to_string())
    }
}

/// Analyzer that records a recipient and then fails.
struct Flaky;

impl MessageAnalyzer for Flaky {
    fn id(&self) -> &str {
        "flaky"
    }

    fn analyze(&self, _message: &Message, result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        result.set_bounce_recipient("partial@example.com");
        Err(AnalyzerError::failed("flaky", "lost its footing"))
    }
}

/// Analyzer counting its invocations.
struct Counting(Arc<AtomicUsize>);

impl MessageAnalyzer for Counting {
    fn id(&self) -> &str {
        "counting"
    }

    fn analyze(&self, _message: &Message, _result: &mut AnalyzerResult) -> Result<(), AnalyzerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn postfix_access_denied() {
    let message = fixture("accessdenied.eml");

    let description = only(DescriptionAnalyzer::new()).run(&message);
    assert_eq!(description.bounce_reason(), Some(ACCESS_DENIED_REASON));
    assert_eq!(description.bounce_status_code(), None);

    let status = only(StatusCodeAnalyzer::new()).run(&message);
    assert_eq!(status.bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
    assert_eq!(status.bounce_recipient(), Some("user@example.org"));
    assert_eq!(status.bounce_reason(), None);
}

#[test]
fn ordinary_mail_is_not_a_bounce() {
    let message = fixture("normal.eml");

    let description = only(DescriptionAnalyzer::new()).run(&message);
    assert_eq!(description.bounce_reason(), None);

    let result = default_pipeline().run(&message);
    assert_eq!(result.bounce_reason(), None);
    assert_eq!(result.bounce_recipient(), None);
    assert_eq!(result.bounce_status_code(), Some(DsnStatus::SUCCESS));
    assert!(!result.is_bounce());
}

#[test]
fn conversational_mail_is_not_a_bounce() {
    let pipeline = default_pipeline();
    for raw in [
        concat!(
            "From: Alice <alice@example.com>\n",
            "Subject: Lunch and the upgrade\n",
            "\n",
            "I upgraded the server to version 5.1.1 yesterday, ping carol@example.net\n"
        ),
        concat!(
            "From: Bob <bob@example.com>\n",
            "Subject: Party\n",
            "\n",
            "Guests: 450 confirmed, RSVP to dave@example.com\n",
            "If the room is busy we will try again later.\n"
        ),
    ] {
        let result = pipeline.analyze_raw(raw);
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::SUCCESS), "{raw:?}");
        assert_eq!(result.bounce_recipient(), None, "{raw:?}");
        assert_eq!(result.bounce_reason(), None, "{raw:?}");
        assert!(!result.is_bounce(), "{raw:?}");
    }
}

#[test]
fn mailbox_full() {
    let message = fixture("full.eml");

    let status = only(StatusCodeAnalyzer::new()).run(&message);
    assert_eq!(status.bounce_status_code(), Some(DsnStatus::new(4, 2, 2)));
    assert_eq!(status.bounce_recipient(), Some("user@example.org"));

    let description = only(DescriptionAnalyzer::new()).run(&message);
    let reason = description.bounce_reason().unwrap();
    assert!(reason.contains("Mailbox disk quota exceeded"));
    assert_eq!(reason.replace("\r\n", "\n"), FULL_REASON);
}

#[test]
fn base64_domino_report() {
    let message = fixture("nouser.eml");

    let result = default_pipeline().run(&message);
    let reason = result.bounce_reason().unwrap();
    assert!(reason.starts_with("Your message"));
    assert!(reason.contains("not listed in Domino Directory"));
    assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
    assert!(result.is_bounce());
}

#[test]
fn verp_names_the_recipient() {
    let config = Config::builder()
        .return_path("bounces@example.com")
        .verp(true)
        .build();
    let pipeline = Pipeline::from_config(&config, ClassifierKind::Signature.build()).unwrap();

    let result = pipeline.run(&fixture("nouser.eml"));
    assert_eq!(result.bounce_recipient(), Some("environment@lvmh.fr"));
    assert_eq!(
        result.get("verp.address"),
        Some("bounces+environment=lvmh.fr@example.com")
    );
}

#[test]
fn verp_takes_precedence_over_report() {
    let verp = VerpAnalyzer::new("newsletter@kyle.greenpeace.org").unwrap();
    let message = Message::parse(
        std::str::from_utf8(fixture("accessdenied.eml").raw())
            .unwrap()
            .replace(
                "Delivered-To: newsletter@kyle.greenpeace.org",
                "Delivered-To: newsletter+someone=example.net@kyle.greenpeace.org",
            ),
    );
    let result = Pipeline::new()
        .with(verp)
        .with(StatusCodeAnalyzer::new())
        .run(&message);
    assert_eq!(result.bounce_recipient(), Some("someone@example.net"));
    assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
}

#[test]
fn order_decides_between_writers() {
    let message = fixture("accessdenied.eml");

    let classifier_first = Pipeline::new()
        .with(ClassifierAnalyzer::new(Box::new(Fixed("5.1.1"))))
        .with(StatusCodeAnalyzer::new())
        .run(&message);
    assert_eq!(
        classifier_first.bounce_status_code(),
        Some(DsnStatus::new(5, 1, 1))
    );

    let heuristic_first = Pipeline::new()
        .with(StatusCodeAnalyzer::new())
        .with(ClassifierAnalyzer::new(Box::new(Fixed("5.1.1"))))
        .run(&message);
    assert_eq!(
        heuristic_first.bounce_status_code(),
        Some(DsnStatus::new(5, 7, 1))
    );
}

#[test]
fn generic_code_is_refined_down_the_chain() {
    let message = Message::parse("Subject: Returned mail\n\nHost said: 550 mailbox unavailable\n");
    let result = Pipeline::new()
        .with(StatusCodeAnalyzer::new())
        .with(ClassifierAnalyzer::new(Box::new(Fixed("5.1.1"))))
        .run(&message);
    assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
}

#[test]
fn rerunning_an_analyzer_changes_nothing() {
    let message = fixture("accessdenied.eml");
    let analyzers: Vec<Box<dyn MessageAnalyzer>> = vec![
        Box::new(StatusCodeAnalyzer::new()),
        Box::new(DescriptionAnalyzer::new()),
    ];

    let mut result = run_pipeline(&message, &analyzers);
    let first = result.clone();
    for analyzer in &analyzers {
        analyzer.analyze(&message, &mut result).unwrap();
    }
    assert_eq!(result, first);
}

#[test]
fn failing_analyzer_is_isolated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new()
        .with(Flaky)
        .with(Counting(Arc::clone(&calls)))
        .with(StatusCodeAnalyzer::new());

    let result = pipeline.run(&fixture("full.eml"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.bounce_recipient(), Some("partial@example.com"));
    assert_eq!(result.bounce_status_code(), Some(DsnStatus::new(4, 2, 2)));
}

#[test]
fn each_run_starts_fresh() {
    let pipeline = default_pipeline();
    let bounce = pipeline.run(&fixture("accessdenied.eml"));
    let normal = pipeline.run(&fixture("normal.eml"));
    assert!(bounce.is_bounce());
    assert!(!normal.is_bounce());
    assert_eq!(normal.bounce_recipient(), None);
}

#[test]
fn classifier_failures_store_the_default() {
    struct Panics;

    impl StatusClassifier for Panics {
        fn classify(&self, _raw: &[u8]) -> Result<String, ClassifierError> {
            panic!("bad signature table")
        }
    }

    let message = fixture("normal.eml");
    for classifier in [
        Box::new(Panics) as Box<dyn StatusClassifier>,
        Box::new(NoopClassifier),
        Box::new(Fixed("not a status")),
    ] {
        let result = only(
            ClassifierAnalyzer::new(classifier).with_default_status(DsnStatus::TRANSIENT),
        )
        .run(&message);
        assert_eq!(result.bounce_status_code(), Some(DsnStatus::TRANSIENT));
    }
}

#[test]
fn pipelines_run_in_parallel() {
    let pipeline = Arc::new(default_pipeline());
    let handles: Vec<_> = ["accessdenied.eml", "full.eml", "normal.eml", "nouser.eml"]
        .into_iter()
        .map(|name| {
            let pipeline = Arc::clone(&pipeline);
            let message = fixture(name);
            std::thread::spawn(move || pipeline.run(&message))
        })
        .collect();

    let results: Vec<AnalyzerResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0].bounce_status_code(), Some(DsnStatus::new(5, 7, 1)));
    assert_eq!(results[1].bounce_status_code(), Some(DsnStatus::new(4, 2, 2)));
    assert!(!results[2].is_bounce());
    assert_eq!(results[3].bounce_status_code(), Some(DsnStatus::new(5, 1, 1)));
}

#[test]
fn result_serializes_for_output() {
    let result = default_pipeline().run(&fixture("full.eml"));
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["bounce_status_code"], "4.2.2");
    assert_eq!(json["bounce_recipient"], "user@example.org");
}
