//! CLI argument parsing and command handlers
//!
//! The binary is a developer harness around the library: it loads a JSON
//! document snapshot into a [`MemoryDocument`], runs a search through the
//! same [`SearchController`] a host UI would use, and prints the result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{EngineConfig, get_api_token, load_config};
use crate::document::{DocumentTree, MemoryDocument};
use crate::models::Settings;
use crate::output;
use crate::patterns::PatternDetector;
use crate::remote::{ChunkConfig, HttpRemoteMatcher, create_batches};
use crate::session::{SearchController, SearchSummary};
use crate::store::{JsonFileStore, KeyValueStore, MemoryStore};

/// Pagelight: in-page search and highlight engine
#[derive(Parser, Debug)]
#[command(
    name = "pagelight",
    version,
    about = "Search and highlight text in a document snapshot",
    long_about = "Developer harness for the pagelight engine. Loads a JSON document snapshot, \
                  runs a search exactly as a host page would, and prints the matches."
)]
pub struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory containing pagelight.toml
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search a document snapshot
    ///
    /// Examples:
    ///   pagelight search page.json "invoice"
    ///   pagelight search page.json "cat \"hot dog\"" --multi-term
    ///   pagelight search page.json "email"            # upgraded to the email pattern
    ///   pagelight search page.json "what grew?" --ai
    Search {
        /// JSON snapshot of the document tree
        snapshot: PathBuf,

        /// Search query
        query: String,

        /// Match case exactly
        #[arg(short = 'c', long)]
        case_sensitive: bool,

        /// Treat the query as a regular expression
        #[arg(short, long)]
        regex: bool,

        /// Split the query into separately colored terms
        #[arg(short, long)]
        multi_term: bool,

        /// Fall back to the remote matcher when nothing matches
        #[arg(long)]
        ai: bool,

        /// Do not upgrade keyword queries to canned patterns
        #[arg(long)]
        no_patterns: bool,

        /// Persist settings and rate-limit history in this JSON file
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,

        /// Output format as JSON
        #[arg(long)]
        json: bool,

        /// Pretty-print JSON output (only with --json)
        #[arg(long)]
        pretty: bool,
    },

    /// Show which canned pattern a query would be upgraded to
    Detect {
        /// Query to classify
        query: String,

        /// Output format as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a text file would be split into remote batches
    Chunks {
        /// Plain text file
        file: PathBuf,

        /// Output format as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // Setup logging based on verbosity
        let log_level = match self.verbose {
            0 => "warn",  // Default: only warnings and errors
            1 => "info",  // -v: show info messages
            2 => "debug", // -vv: show debug messages
            _ => "trace", // -vvv: show trace messages
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
            .init();

        let config = load_config(&self.config)?;

        match self.command {
            Command::Search {
                snapshot,
                query,
                case_sensitive,
                regex,
                multi_term,
                ai,
                no_patterns,
                state,
                json,
                pretty,
            } => {
                let settings = Settings {
                    case_sensitive,
                    use_regex: regex,
                    multi_term,
                    ai_mode: ai,
                    detect_patterns: !no_patterns,
                };
                let output = OutputFormat { json, pretty };
                match state {
                    Some(path) => {
                        let store = JsonFileStore::open(&path)?;
                        handle_search(config, store, &snapshot, &query, settings, output)
                    }
                    None => handle_search(config, MemoryStore::new(), &snapshot, &query, settings, output),
                }
            }
            Command::Detect { query, json } => handle_detect(&query, json),
            Command::Chunks { file, json } => handle_chunks(&config, &file, json),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OutputFormat {
    json: bool,
    pretty: bool,
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json_str = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json_str);
    Ok(())
}

fn handle_search<S: KeyValueStore>(
    config: EngineConfig,
    store: S,
    snapshot: &Path,
    query: &str,
    settings: Settings,
    output: OutputFormat,
) -> Result<()> {
    let raw = std::fs::read_to_string(snapshot)
        .with_context(|| format!("Failed to read snapshot {:?}", snapshot))?;
    let mut doc = MemoryDocument::from_json(&raw)
        .with_context(|| format!("Failed to load snapshot {:?}", snapshot))?;

    let remote = HttpRemoteMatcher::new(&config.remote, get_api_token());
    let mut controller = SearchController::new(config, remote, store);
    controller.set_listener(|event| log::info!("{}", event.status_message()));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    let start = Instant::now();
    let result = runtime.block_on(async {
        let canceller = controller.canceller();
        let search = controller.search(&mut doc, query, settings);
        tokio::pin!(search);
        tokio::select! {
            result = &mut search => result,
            _ = tokio::signal::ctrl_c() => {
                canceller.cancel();
                search.await
            }
        }
    });
    let elapsed = start.elapsed();

    let summary = match result {
        Ok(summary) => summary,
        Err(e) if e.is_cancelled() => {
            output::warn("Search cancelled.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Search failed"),
    };

    if output.json {
        return print_json(&summary, output.pretty);
    }

    // Unwrap the markers so each span's node holds the text it was found in
    runtime.block_on(controller.reset(&mut doc));
    print_summary(&doc, &summary, elapsed.as_millis());
    Ok(())
}

fn print_summary(doc: &MemoryDocument, summary: &SearchSummary, elapsed_ms: u128) {
    if let Some(pattern) = &summary.pattern {
        println!("{} {}", "Pattern:".bold(), pattern.description);
    }

    for (i, span) in summary.matches.iter().enumerate() {
        let current = summary.current == Some(i);
        let text = doc.text(span.start.node).unwrap_or_default();
        let end = if span.is_single_leaf() {
            span.end.offset
        } else {
            text.len()
        };
        let marker = if current { ">" } else { " " };
        println!(
            "{} {:>4}  {}  {}",
            marker,
            i + 1,
            format!("{}:{}", span.start.node, span.start.offset).dimmed(),
            output::excerpt(text, span.start.offset, end, current)
        );
    }

    println!(
        "\n{} ({:?}, {}ms)",
        summary.label.bold(),
        summary.path,
        elapsed_ms
    );

    if let Some(status) = &summary.status {
        output::remote_status(status);
    }
}

fn handle_detect(query: &str, as_json: bool) -> Result<()> {
    let detected = PatternDetector::new().detect(query);

    if as_json {
        return print_json(&detected, false);
    }

    match detected {
        Some(pattern) => {
            println!("{} {}", "Pattern:".bold(), pattern.description);
            for term in pattern.search_mode().terms() {
                println!("  {}", term.cyan());
            }
        }
        None => output::info(&format!("'{}' is not a pattern query.", query)),
    }
    Ok(())
}

fn handle_chunks(config: &EngineConfig, file: &Path, as_json: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {:?}", file))?;
    let batches = create_batches(&text, &ChunkConfig::from(&config.remote));

    if as_json {
        let rows: Vec<serde_json::Value> = batches
            .iter()
            .map(|b| {
                serde_json::json!({
                    "ordinal": b.ordinal,
                    "startOffset": b.start_offset,
                    "endOffset": b.end_offset(),
                    "chars": b.text.chars().count(),
                })
            })
            .collect();
        return print_json(&rows, false);
    }

    println!(
        "{} bytes -> {} batch(es)",
        text.len(),
        batches.len().to_string().bold()
    );
    for batch in &batches {
        println!(
            "  #{:<2} {:>9}..{:<9} {} chars",
            batch.ordinal,
            batch.start_offset,
            batch.end_offset(),
            batch.text.chars().count()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_flags_parse() {
        let cli = Cli::try_parse_from([
            "pagelight", "-vv", "search", "page.json", "cat dog", "--multi-term", "--json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Search {
                query,
                multi_term,
                json,
                regex,
                ..
            } => {
                assert_eq!(query, "cat dog");
                assert!(multi_term);
                assert!(json);
                assert!(!regex);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
