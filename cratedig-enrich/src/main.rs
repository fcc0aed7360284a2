//! cratedig-enrich - operator CLI
//!
//! Inspect normalization and matching offline, run one enrichment, manage the
//! cooldown queue and score audit trail, and write or show the configuration.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cratedig_common::config::{default_config_path, resolve_config_path};
use cratedig_enrich::normalize::{fuzzy_match, fuzzy_scores, parse};
use cratedig_enrich::scoring::ConfidenceScorer;
use cratedig_enrich::types::IdentificationRequest;
use cratedig_enrich::{EnrichConfig, EnrichService};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cratedig-enrich", version, about = "Track metadata enrichment")]
struct Cli {
    /// Configuration file (else CRATEDIG_CONFIG, else the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a raw title into its clean title, hints and search key
    Normalize { title: String },

    /// Fuzzy-match a query against candidate titles
    Match {
        query: String,
        #[arg(required = true)]
        candidates: Vec<String>,
        /// Acceptance threshold (0-100), defaults to the configured one
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Enrich one track through the configured providers
    Enrich {
        track_id: String,
        title: String,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },

    /// Cooldown queue maintenance
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Confidence score audit trail for a track
    Scores { track_id: String },

    /// Configuration file maintenance
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the built-in defaults to the configuration file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Queue depth and attempt statistics
    Stats,
    /// Entries whose retry time has elapsed (not claimed)
    Ready {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Make a waiting track retryable now
    Reset { track_id: String },
    /// Reopen a permanently failed track with a fresh attempt budget
    Reopen { track_id: String },
}

fn init_tracing(config: &EnrichConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.logging.ansi)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct MatchReport {
    candidate: String,
    score: f64,
    confidence: f64,
}

/// Write defaults where `load` would look for them
fn init_config(cli_arg: Option<&std::path::Path>, force: bool) -> Result<()> {
    let path = resolve_config_path(cli_arg)
        .or_else(default_config_path)
        .context("No configuration directory on this platform; pass --config")?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }
    EnrichConfig::default().save(&path)?;
    println!("{}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The target file may not exist yet, so this runs before loading
    if let Command::Config {
        action: ConfigAction::Init { force },
    } = &cli.command
    {
        return init_config(cli.config.as_deref(), *force);
    }

    let mut config = EnrichConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database.path = Some(path);
    }
    init_tracing(&config);

    match cli.command {
        Command::Normalize { title } => print_json(&parse(&title)),

        Command::Match {
            query,
            candidates,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(config.matcher.fuzzy_threshold);
            let scorer = ConfidenceScorer::with_fuzzy_threshold(threshold);
            for candidate in &candidates {
                let scores = fuzzy_scores(&query, candidate);
                info!(
                    candidate = %candidate,
                    ratio = scores.ratio,
                    partial = scores.partial,
                    token_sort = scores.token_sort,
                    token_set = scores.token_set,
                    "Fuzzy scores"
                );
            }
            let report: Vec<MatchReport> = fuzzy_match(&query, &candidates, threshold)
                .into_iter()
                .map(|m| MatchReport {
                    confidence: scorer.fuzzy_confidence(m.score),
                    candidate: m.candidate,
                    score: m.score,
                })
                .collect();
            print_json(&report)
        }

        Command::Enrich {
            track_id,
            title,
            artist,
            year,
        } => {
            let service = EnrichService::open(&config).await?;
            let mut request = IdentificationRequest::new(track_id, title);
            request.raw_artist = artist;
            request.year = year;
            let result = service.orchestrator.enrich(&request).await?;
            info!(
                track_id = %result.track_id,
                resolved = result.status.is_success(),
                unresolved = result.unresolved.len(),
                "Enrichment finished"
            );
            print_json(&result)
        }

        Command::Queue { action } => {
            let service = EnrichService::open(&config).await?;
            match action {
                QueueAction::Stats => print_json(&service.queue.stats().await?),
                QueueAction::Ready { limit } => print_json(&service.queue.peek_ready(limit).await?),
                QueueAction::Reset { track_id } => {
                    let reset = service.queue.reset(&track_id).await?;
                    println!("{}: {}", track_id, if reset { "ready" } else { "not reset" });
                    Ok(())
                }
                QueueAction::Reopen { track_id } => {
                    let reopened = service.queue.reopen(&track_id).await?;
                    println!("{}: {}", track_id, if reopened { "reopened" } else { "not permanently failed" });
                    Ok(())
                }
            }
        }

        Command::Scores { track_id } => {
            let service = EnrichService::open(&config).await?;
            print_json(&service.scores.list_for_track(&track_id).await?)
        }

        Command::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init { .. } => Ok(()),
        },
    }
}
