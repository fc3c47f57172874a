//! Binary entry point for extractd.
//!
//! Runs single extractions against a configured backend and exposes the
//! local classification and pattern stages for inspection.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use extractd::config::ExtractdConfig;
use extractd::coordinator::CoordinatorService;
use extractd::extraction::{ComplexityClassifier, PatternRuleSet, is_casual};
use extractd::models::{CONVERSATION_CONTEXT_KEY, Priority, Request, RequestKind};
use extractd::observability::{self, ObservabilityConfig};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// extractd - adaptive-depth memory extraction.
#[derive(Parser)]
#[command(name = "extractd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "EXTRACTD_CONFIG")]
    config: Option<PathBuf>,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Extract facts from one utterance.
    Submit {
        /// The utterance.
        text: String,

        /// Conversation owner.
        #[arg(short, long, default_value = "cli")]
        owner: String,

        /// Request kind: user-input, consciousness-module, memory-fusion, background.
        #[arg(short, long, default_value = "user-input")]
        kind: String,

        /// Explicit priority: critical, high, normal, low.
        #[arg(short, long)]
        priority: Option<String>,

        /// Timeout budget in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Recent conversation, used by Deep prompts.
        #[arg(long)]
        conversation: Option<String>,

        /// Also print coordinator statistics.
        #[arg(long)]
        stats: bool,
    },

    /// Show the complexity score and selected tier.
    Classify {
        /// The utterance.
        text: String,
    },

    /// Run the local small-talk filter and pattern rules.
    Match {
        /// The utterance.
        text: String,
    },

    /// Probe the backend and show circuit health.
    Health,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match ExtractdConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(ObservabilityConfig {
        logging: config.logging.clone().with_verbose(cli.verbose),
        metrics: config.metrics.clone(),
        metrics_expose: false,
    }) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, config: &ExtractdConfig) -> anyhow::Result<ExitCode> {
    let pretty = cli.pretty;
    match cli.command {
        Commands::Submit {
            text,
            owner,
            kind,
            priority,
            timeout,
            conversation,
            stats,
        } => {
            let Some(kind) = RequestKind::parse(&kind) else {
                bail!("unknown request kind '{kind}'");
            };
            let mut request = Request::new(owner, text, kind);
            if let Some(priority) = priority {
                let Some(priority) = Priority::parse(&priority) else {
                    bail!("unknown priority '{priority}'");
                };
                request = request.with_priority(priority);
            }
            if let Some(secs) = timeout {
                request = request.with_timeout(Duration::from_secs(secs));
            }
            if let Some(conversation) = conversation {
                request = request.with_context(CONVERSATION_CONTEXT_KEY, conversation);
            }
            cmd_submit(config, &request, stats, pretty)
        },
        Commands::Classify { text } => {
            let classifier = ComplexityClassifier::new(config.coordinator.tiers);
            print_json(&classifier.classify(&text), pretty)?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Match { text } => cmd_match(&text, pretty),
        Commands::Health => cmd_health(config, pretty),
    }
}

fn cmd_submit(
    config: &ExtractdConfig,
    request: &Request,
    stats: bool,
    pretty: bool,
) -> anyhow::Result<ExitCode> {
    let service =
        CoordinatorService::from_config(config).context("Failed to start coordinator")?;
    let outcome = service.submit(request);
    if stats {
        print_json(
            &json!({ "outcome": outcome, "metrics": service.metrics() }),
            pretty,
        )?;
    } else {
        print_json(&outcome, pretty)?;
    }
    service.close();
    Ok(if outcome.error_kind().is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_match(text: &str, pretty: bool) -> anyhow::Result<ExitCode> {
    if is_casual(text) {
        print_json(&json!({ "casual": true, "rule": null, "facts": null }), pretty)?;
        return Ok(ExitCode::SUCCESS);
    }
    let rules = PatternRuleSet::standard();
    match rules.try_extract_named(text) {
        Some((rule, facts)) => {
            print_json(&json!({ "casual": false, "rule": rule, "facts": facts }), pretty)?;
            Ok(ExitCode::SUCCESS)
        },
        None => {
            print_json(&json!({ "casual": false, "rule": null, "facts": null }), pretty)?;
            Ok(ExitCode::from(2))
        },
    }
}

fn cmd_health(config: &ExtractdConfig, pretty: bool) -> anyhow::Result<ExitCode> {
    let service =
        CoordinatorService::from_config(config).context("Failed to start coordinator")?;
    let healthy = service.probe_health();
    print_json(
        &json!({
            "endpoint": config.transport.endpoint,
            "healthy": healthy,
            "circuit": service.circuit_health(),
        }),
        pretty,
    )?;
    service.close();
    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}
