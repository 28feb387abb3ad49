//! CLI interface for seldon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::assistant::{Assistant, CommandAssistant};
use crate::config::Config;
use crate::error::SeldonError;
use crate::ledger::ExecutionLedger;
use crate::patterns::{PatternExtractor, PatternStore};
use crate::prompt::PromptEvolution;
use crate::stats::{StatsAggregator, StatsReport, StatsWindow};
use crate::terms::TerminologyDictionary;

#[derive(Parser)]
#[command(name = "seldon")]
#[command(about = "Self-improving learning loop for a coding-assistant CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Override the data directory (default: platform data dir)
    #[arg(long, env = "SELDON_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the stores and the root prompt version
    Init,
    /// Run a task against the assistant and record the outcome
    Execute {
        /// Task description
        task: String,
    },
    /// Extract candidate patterns from executions since the last reflect
    Reflect,
    /// Review candidate patterns, optionally applying a selection
    Analyze {
        /// Commit selected patterns into a new prompt version
        #[arg(long)]
        apply: bool,
        /// Pattern ids to apply (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        select: Vec<u64>,
        /// Reason recorded on candidates left unselected
        #[arg(long, default_value = "not selected for application")]
        reason: String,
        /// Allow committing a no-op evolution with no patterns
        #[arg(long)]
        allow_empty: bool,
    },
    /// Show aggregate reliability statistics
    Stats {
        /// Restrict to executions under one prompt version
        #[arg(long)]
        prompt_version: Option<u64>,
        /// Report one pattern's effectiveness instead of a ledger window
        #[arg(long, conflicts_with_all = ["prompt_version", "since", "until"])]
        pattern: Option<u64>,
        /// Only executions at or after this instant (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Only executions at or before this instant (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,
    },
    /// Show the current prompt version and text
    Prompt,
    /// Show the execution history
    History {
        /// Maximum records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Records to skip from the start
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },
    /// Show the prompt lineage with applied-pattern annotations
    Evolution,
    /// Manage the terminology dictionary
    Terms {
        #[command(subcommand)]
        command: TermCommands,
    },
}

#[derive(Subcommand)]
enum TermCommands {
    /// Record a canonical meaning for a term
    Add {
        term: String,
        meaning: String,
        /// Ledger record that surfaced this meaning
        #[arg(long)]
        source_record: Option<u64>,
    },
    /// List current meanings
    List {
        /// Show every recorded entry, superseded meanings included
        #[arg(long)]
        all: bool,
    },
    /// Show every recorded meaning for a term, oldest first
    History { term: String },
}

/// Resolved store handles for one command invocation
struct Stores {
    ledger: ExecutionLedger,
    patterns: PatternStore,
    evolution: PromptEvolution,
    dictionary: TerminologyDictionary,
}

fn open_stores(data_dir: &Option<PathBuf>) -> Result<Stores> {
    let base = match data_dir {
        Some(dir) => dir.clone(),
        None => crate::config::data_dir()?,
    };
    Ok(Stores {
        ledger: ExecutionLedger::with_dir(base.clone())?,
        patterns: PatternStore::with_dir(base.clone())?,
        evolution: PromptEvolution::with_dir(base.clone())?,
        dictionary: TerminologyDictionary::with_dir(base)?,
    })
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let mut stores = open_stores(&cli.data_dir)?;

    match cli.command {
        Commands::Init => {
            let root = stores.evolution.init()?;
            println!("Initialized at prompt version {}", root.version_id);
            println!("Ledger: {}", stores.ledger.path().display());
        }
        Commands::Execute { task } => {
            let assistant = CommandAssistant::new(config.assistant.clone());
            execute(&mut stores, &config, &assistant, &task).await?;
        }
        Commands::Reflect => {
            reflect(&stores, &config)?;
        }
        Commands::Analyze { apply, select, reason, allow_empty } => {
            if apply {
                analyze_apply(&stores, &select, &reason, allow_empty)?;
            } else {
                analyze(&stores)?;
            }
        }
        Commands::Stats { prompt_version, pattern, since, until } => {
            let records = stores.ledger.read()?;
            let report = match pattern {
                Some(id) => {
                    let pattern = stores
                        .patterns
                        .get(id)?
                        .ok_or(SeldonError::not_found("pattern", id))?;
                    let versions = stores.evolution.versions()?;
                    println!("Statistics (pattern #{id}: {})", pattern.signature);
                    StatsAggregator::pattern_effectiveness(&records, &pattern, &versions)
                }
                None => {
                    let window = StatsWindow {
                        prompt_versions: prompt_version.map(|v| [v].into_iter().collect()),
                        record_ids: None,
                        since: since.as_deref().map(parse_instant).transpose()?,
                        until: until.as_deref().map(parse_instant).transpose()?,
                    };
                    match prompt_version {
                        Some(v) => println!("Statistics (prompt version {v})"),
                        None if window.since.is_some() || window.until.is_some() => {
                            println!("Statistics (time range)")
                        }
                        None => println!("Statistics (all time)"),
                    }
                    StatsAggregator::report(&records, &window)
                }
            };
            print_report(&report);
        }
        Commands::Prompt => {
            let current = stores.evolution.current()
                .context("No prompt chain yet; run 'seldon init' first")?;
            println!("Prompt version {}", current.version_id);
            println!("---");
            println!("{}", current.text);
        }
        Commands::History { limit, offset } => {
            let records = stores.ledger.read_page(offset, limit)?;
            if records.is_empty() {
                println!("No executions recorded.");
            } else {
                for record in &records {
                    println!(
                        "#{} [{}] v{} {} - {}",
                        record.id,
                        record.timestamp.format("%Y-%m-%d %H:%M"),
                        record.prompt_version,
                        record.outcome,
                        record.task
                    );
                }
            }
        }
        Commands::Evolution => {
            show_evolution(&stores)?;
        }
        Commands::Terms { command } => match command {
            TermCommands::Add { term, meaning, source_record } => {
                let entry = stores.dictionary.record(&term, &meaning, source_record)?;
                println!("Recorded '{}' -> '{}'", entry.term, entry.canonical_meaning);
            }
            TermCommands::List { all } => {
                if all {
                    let entries = stores.dictionary.entries()?;
                    if entries.is_empty() {
                        println!("No terms recorded.");
                    } else {
                        for entry in &entries {
                            println!(
                                "[{}] {} -> {}",
                                entry.recorded_at.format("%Y-%m-%d %H:%M"),
                                entry.term,
                                entry.canonical_meaning
                            );
                        }
                    }
                } else {
                    let entries = stores.dictionary.current_entries()?;
                    if entries.is_empty() {
                        println!("No terms recorded.");
                    } else {
                        for entry in &entries {
                            println!("{} -> {}", entry.term, entry.canonical_meaning);
                        }
                    }
                }
            }
            TermCommands::History { term } => {
                let entries = stores.dictionary.history(&term)?;
                if entries.is_empty() {
                    println!("No entries for '{term}'.");
                } else {
                    for entry in &entries {
                        println!(
                            "[{}] {} -> {}",
                            entry.recorded_at.format("%Y-%m-%d %H:%M"),
                            entry.term,
                            entry.canonical_meaning
                        );
                    }
                }
            }
        },
    }

    Ok(())
}

fn print_report(report: &StatsReport) {
    println!("==========================");
    println!("Attempts:     {}", report.total);
    println!("Successes:    {}", report.successes);
    println!("Failures:     {}", report.failures);
    println!("Partial:      {}", report.partials);
    println!("Success rate: {:.1}%", report.success_rate * 100.0);
    if !report.failures_by_signature.is_empty() {
        println!();
        println!("Failures by signature:");
        for (signature, count) in &report.failures_by_signature {
            println!("  {count}x {signature}");
        }
    }
    if let Some(trend) = &report.trend {
        println!();
        println!(
            "Trend: {} ({:.1}% -> {:.1}%)",
            trend.direction,
            trend.previous_rate * 100.0,
            trend.recent_rate * 100.0
        );
    }
}

/// Parse an RFC 3339 instant, or a bare date as midnight UTC
fn parse_instant(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    if let Ok(instant) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&chrono::Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Unrecognized instant '{raw}' (RFC 3339 or YYYY-MM-DD)"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .context("Invalid time of day")
}

/// Run one task and append the outcome to the ledger
async fn execute(
    stores: &mut Stores,
    config: &Config,
    assistant: &dyn Assistant,
    task: &str,
) -> Result<u64> {
    let current = stores.evolution.init()?;
    let result = assistant.run(&current.text, task).await?;
    let excerpt = crate::assistant::excerpt(&result.raw_output, config.extraction.max_excerpt_len);

    let record = stores
        .ledger
        .append(task, current.version_id, result.outcome, &excerpt)?;
    println!("Recorded execution #{}: {}", record.id, record.outcome);
    Ok(record.id)
}

/// Mine executions newer than the reflect checkpoint
fn reflect(stores: &Stores, config: &Config) -> Result<()> {
    let checkpoint = stores.patterns.checkpoint()?;
    let slice = stores.ledger.read_since(checkpoint)?;
    if slice.is_empty() {
        println!("Nothing new to reflect on.");
        return Ok(());
    }

    let terms = stores
        .dictionary
        .current_entries()?
        .into_iter()
        .map(|e| (e.term, e.canonical_meaning))
        .collect();
    let extractor = PatternExtractor::new(config.extraction.clone(), terms);
    let extracted = extractor.extract(&slice);
    let reflected_through = slice.iter().map(|r| r.id).max().unwrap_or(checkpoint);

    let stored = stores.patterns.absorb(extracted, reflected_through)?;
    if stored.is_empty() {
        println!("Reflected over {} records; no recurring patterns yet.", slice.len());
    } else {
        println!("Reflected over {} records; {} candidate patterns:", slice.len(), stored.len());
        for pattern in &stored {
            println!(
                "  #{} [{}] {:.0}% ({}x) {}",
                pattern.id,
                pattern.kind,
                pattern.confidence * 100.0,
                pattern.occurrence_count,
                pattern.signature
            );
        }
    }
    Ok(())
}

/// Read-only candidate listing, confidence descending
fn analyze(stores: &Stores) -> Result<()> {
    let candidates = stores.patterns.candidates()?;
    if candidates.is_empty() {
        println!("No candidate patterns. Run 'seldon reflect' after some executions.");
        return Ok(());
    }
    println!("{} candidate patterns:", candidates.len());
    for pattern in &candidates {
        println!(
            "  #{} [{}] {:.0}% ({}x) {} (records: {:?})",
            pattern.id,
            pattern.kind,
            pattern.confidence * 100.0,
            pattern.occurrence_count,
            pattern.signature,
            pattern.supporting_record_ids
        );
    }
    println!();
    println!("Apply with: seldon analyze --apply --select <ids>");
    Ok(())
}

/// Commit selected candidates into a new prompt version; reject the rest
fn analyze_apply(
    stores: &Stores,
    select: &[u64],
    reason: &str,
    allow_empty: bool,
) -> Result<()> {
    let candidates = stores.patterns.candidates()?;
    let selected: Vec<_> = candidates
        .iter()
        .filter(|p| select.contains(&p.id))
        .cloned()
        .collect();

    if selected.len() != select.len() {
        let known: BTreeSet<u64> = candidates.iter().map(|p| p.id).collect();
        let missing: Vec<u64> = select.iter().copied().filter(|id| !known.contains(id)).collect();
        anyhow::bail!("Unknown or non-candidate pattern ids: {missing:?}");
    }

    let draft = stores.evolution.propose(&selected, allow_empty)?;
    let version = stores.evolution.commit(draft)?;
    stores.patterns.mark_applied(&version.applied_patterns)?;

    let leftover: BTreeSet<u64> = candidates
        .iter()
        .filter(|p| !version.applied_patterns.contains(&p.id))
        .map(|p| p.id)
        .collect();
    if !leftover.is_empty() {
        stores.patterns.mark_rejected(&leftover, reason)?;
    }

    println!(
        "Committed prompt version {} (parent {}, {} patterns applied, {} rejected)",
        version.version_id,
        version.parent_version_id.unwrap_or(0),
        version.applied_patterns.len(),
        leftover.len()
    );
    Ok(())
}

/// Print the lineage of the current version, root first
fn show_evolution(stores: &Stores) -> Result<()> {
    let current_id = match stores.evolution.current_id() {
        Ok(id) => id,
        Err(_) => {
            println!("No prompt chain yet; run 'seldon init' first.");
            return Ok(());
        }
    };
    let chain = stores.evolution.lineage(current_id)?;
    let all_patterns = stores.patterns.all()?;

    println!("Prompt evolution ({} versions)", chain.len());
    println!("==============================");
    let mut previous_lines = 0usize;
    for version in &chain {
        let marker = if version.version_id == current_id { " (current)" } else { "" };
        println!();
        println!("Version {}{}", version.version_id, marker);
        println!("  Created: {}", version.created_at.format("%Y-%m-%d %H:%M UTC"));
        let lines = version.text.lines().count();
        println!("  Changes from previous: +{} rule lines", lines.saturating_sub(previous_lines));
        previous_lines = lines;
        if version.applied_patterns.is_empty() {
            println!("  Patterns: none");
        } else {
            println!("  Patterns:");
            for id in &version.applied_patterns {
                match all_patterns.iter().find(|p| p.id == *id) {
                    Some(p) => println!("    #{} [{}] {}", p.id, p.kind, p.signature),
                    None => println!("    #{id} (missing from pattern store)"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_instant_accepts_rfc3339() {
        let instant = parse_instant("2026-08-01T12:30:00Z").unwrap();
        assert_eq!(instant.hour(), 12);
        assert_eq!(instant.minute(), 30);
    }

    #[test]
    fn test_parse_instant_accepts_bare_date_as_midnight_utc() {
        let instant = parse_instant("2026-08-01").unwrap();
        assert_eq!((instant.year(), instant.month(), instant.day()), (2026, 8, 1));
        assert_eq!(instant.hour(), 0);
    }

    #[test]
    fn test_parse_instant_rejects_garbage() {
        assert!(parse_instant("yesterday").is_err());
    }
}
