//! `BounceLedger` - classify bounced email messages
//!
//! Reads raw messages from files (or stdin) and reports the failed recipient,
//! delivery status code and bounce explanation found in each.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bounceledger_core::{AnalyzerResult, Config, Pipeline};
use clap::{Arg, ArgAction, Command};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One line of JSON output.
#[derive(Serialize)]
struct Report<'a> {
    source: &'a str,
    is_bounce: bool,
    #[serde(flatten)]
    result: &'a AnalyzerResult,
}

fn cli() -> Command {
    Command::new("bounceledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Classify bounced email messages")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (defaults to the user config directory)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print one JSON object per message")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-config")
                .long("check-config")
                .help("Validate the configuration, print the analyzer order and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("files")
                .value_name("FILE")
                .help("Raw messages to classify; reads stdin when none are given")
                .num_args(0..)
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bounceledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let matches = cli().get_matches();

    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    let pipeline = Pipeline::from_config(&config, config.classifier.build())
        .context("Failed to build analyzer pipeline")?;

    if matches.get_flag("check-config") {
        println!("Configuration OK");
        println!("Analyzers: {}", pipeline.analyzer_ids().join(", "));
        return Ok(());
    }

    let json = matches.get_flag("json");
    let files: Vec<&PathBuf> = matches
        .get_many::<PathBuf>("files")
        .map(Iterator::collect)
        .unwrap_or_default();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if files.is_empty() {
        let mut raw = Vec::new();
        io::stdin()
            .read_to_end(&mut raw)
            .context("Failed to read message from stdin")?;
        let result = pipeline.analyze_raw(&raw);
        print_report(&mut out, "-", &result, json)?;
        return Ok(());
    }

    let mut failures = 0usize;
    for path in files {
        let source = path.display().to_string();
        match std::fs::read(path) {
            Ok(raw) => {
                debug!("Analyzing {}", source);
                let result = pipeline.analyze_raw(&raw);
                print_report(&mut out, &source, &result, json)?;
            }
            Err(e) => {
                warn!("Skipping {}: {}", source, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} file(s) could not be read");
    }
    Ok(())
}

/// Loads the configuration from `path`, or from the default location.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default().context("Failed to load configuration")?,
    };
    info!(
        analyzers = config.analyzers.len(),
        verp = config.verp,
        "Configuration loaded"
    );
    Ok(config)
}

fn print_report(
    out: &mut impl Write,
    source: &str,
    result: &AnalyzerResult,
    json: bool,
) -> Result<()> {
    if json {
        let report = Report {
            source,
            is_bounce: result.is_bounce(),
            result,
        };
        serde_json::to_writer(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }

    let verdict = if result.is_bounce() { "bounce" } else { "not a bounce" };
    writeln!(out, "{source}: {verdict}")?;
    if let Some(code) = result.bounce_status_code() {
        writeln!(out, "  status:    {code} ({})", code.label())?;
    }
    if let Some(recipient) = result.bounce_recipient() {
        writeln!(out, "  recipient: {recipient}")?;
    }
    if let Some(reason) = result.bounce_reason() {
        let first_line = reason
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        writeln!(out, "  reason:    {first_line}")?;
    }
    for (key, value) in result.properties() {
        writeln!(out, "  {key}: {value}")?;
    }
    Ok(())
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
    use bounceledger_core::DsnStatus;

    fn sample() -> AnalyzerResult {
        let mut result = AnalyzerResult::new();
        result.set_bounce_status_code(DsnStatus::new(5, 1, 1));
        result.set_bounce_recipient("user@example.org");
        result.set_bounce_reason("\n  User unknown\nmore detail");
        result
    }

    #[test]
    fn cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn parses_arguments() {
        let matches = cli()
            .try_get_matches_from(["bounceledger", "--json", "-c", "cfg.json", "a.eml", "b.eml"])
            .unwrap();
        assert!(matches.get_flag("json"));
        assert_eq!(
            matches.get_one::<PathBuf>("config").unwrap(),
            &PathBuf::from("cfg.json")
        );
        assert_eq!(matches.get_many::<PathBuf>("files").unwrap().count(), 2);
    }

    #[test]
    fn text_report() {
        let mut out = Vec::new();
        print_report(&mut out, "bounce.eml", &sample(), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "bounce.eml: bounce\n  status:    5.1.1 (Permanent Failure: Bad destination mailbox address)\n  recipient: user@example.org\n  reason:    User unknown\n"
        );
    }

    #[test]
    fn json_report() {
        let mut out = Vec::new();
        print_report(&mut out, "bounce.eml", &sample(), true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["source"], "bounce.eml");
        assert_eq!(value["is_bounce"], true);
        assert_eq!(value["bounce_status_code"], "5.1.1");
        assert_eq!(value["bounce_recipient"], "user@example.org");
    }
}
