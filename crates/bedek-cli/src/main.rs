//! bedek CLI - validate inspection-record exports from the command line.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::error;

use bedek_common::logging::{init_logging, LogConfig, LogLevel};
use bedek_ingest::{ByteSource, Ingestor};
use bedek_quality::{QualityEngine, QualityEngineConfig, RuleCategory};

#[derive(Parser)]
#[command(
    name = "bedek",
    about = "Ingest and quality-validate building-inspection records",
    version
)]
struct Cli {
    /// Log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file and print its quality report
    Ingest {
        /// Path to a .csv, .tsv, .jsonl, or .xlsx export
        file: PathBuf,

        /// Minimum acceptable overall score; exit 1 below it
        #[arg(long, default_value_t = 0.8)]
        threshold: f64,

        /// Run only these rule ids (repeatable)
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// List the built-in validation rules
    Rules {
        /// Restrict to one category (e.g. schema, hebrew_text)
        #[arg(long)]
        category: Option<String>,
    },

    /// List the source formats the ingestor understands
    Formats,
}

fn main() {
    let cli = Cli::parse();

    let log_config = effective_log_config(cli.verbose);
    // The CLI still works if logging cannot initialize.
    let _ = init_logging(&log_config);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(execute_command(cli.command)) {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            file,
            threshold,
            rules,
            json,
        } => ingest(file, threshold, rules, json).await,
        Commands::Rules { category } => list_rules(category).await,
        Commands::Formats => {
            println!("Supported source formats:");
            println!("  delimited   .csv / .tsv (comma, semicolon, or tab)");
            println!("  structured  .jsonl / .ndjson (one JSON object per line)");
            println!("  workbook    .xlsx / .xlsm");
            Ok(())
        }
    }
}

async fn ingest(file: PathBuf, threshold: f64, rules: Vec<String>, json: bool) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        anyhow::bail!("threshold must be within [0, 1], got {threshold}");
    }

    let spinner = create_spinner(&format!("Reading {}", file.display()));
    let source = ByteSource::read_file(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    spinner.set_message("Ingesting records");
    let ingestor = Ingestor::default();
    let outcome = ingestor
        .ingest(&source)
        .with_context(|| format!("failed to ingest {}", file.display()))?;

    spinner.set_message(format!("Validating {} records", outcome.records.len()));
    let engine = QualityEngine::new(QualityEngineConfig::default());
    let rule_ids = if rules.is_empty() {
        None
    } else {
        Some(rules.as_slice())
    };
    let dataset_id = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    let report = match engine
        .validate_dataset(&outcome.records, &dataset_id, rule_ids)
        .await
    {
        Ok(report) => report,
        Err(err) => {
            spinner.finish_and_clear();
            return Err(err.into());
        }
    };
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Dataset:        {dataset_id}");
        println!(
            "Records:        {} ({} failed rows skipped)",
            report.total_records, outcome.failed_rows
        );
        println!(
            "Valid records:  {}/{}",
            report.valid_records, report.total_records
        );
        println!("Overall score:  {:.3}", report.overall_score);
        if outcome.previously_processed {
            println!("Note:           this file content was ingested before");
        }
        if !report.severity_counts.is_empty() {
            println!("Issues:");
            for (severity, count) in &report.severity_counts {
                println!("  {severity:<10} {count}");
            }
        }
        for issue in report.issues.iter().take(10) {
            let location = match (&issue.field, issue.record_index) {
                (Some(field), Some(index)) => format!("record {index}, field `{field}`"),
                (Some(field), None) => format!("field `{field}`"),
                (None, Some(index)) => format!("record {index}"),
                (None, None) => "dataset".to_string(),
            };
            println!("  [{}] {}: {}", issue.severity, location, issue.message);
        }
        if report.issue_count() > 10 {
            println!("  ... and {} more issues", report.issue_count() - 10);
        }
        for recommendation in &report.recommendations {
            println!("Hint: {recommendation}");
        }
    }

    if !report.passes(threshold) {
        anyhow::bail!(
            "quality score {:.3} below threshold {threshold:.3}",
            report.overall_score
        );
    }
    Ok(())
}

async fn list_rules(category: Option<String>) -> Result<()> {
    let category = category.map(|name| parse_category(&name)).transpose()?;
    let engine = QualityEngine::new(QualityEngineConfig::default());
    let rules = engine.list_rules(category).await;

    println!("{:<32} {:<14} {:<8} {}", "ID", "CATEGORY", "SEVERITY", "NAME");
    for rule in rules {
        println!(
            "{:<32} {:<14} {:<8} {}",
            rule.id, rule.category, rule.severity, rule.name
        );
    }
    Ok(())
}

fn parse_category(name: &str) -> Result<RuleCategory> {
    RuleCategory::all()
        .into_iter()
        .find(|category| category.as_str() == name)
        .with_context(|| {
            let known: Vec<&str> = RuleCategory::all().iter().map(|c| c.as_str()).collect();
            format!("unknown category `{name}`; one of: {}", known.join(", "))
        })
}

/// Environment variables win over flags: `--verbose` only picks the level
/// when `BEDEK_LOG_LEVEL` is unset.
fn effective_log_config(verbose: bool) -> LogConfig {
    let mut config = LogConfig::from_env().unwrap_or_default();
    if std::env::var_os("BEDEK_LOG_LEVEL").is_none() {
        config.level = if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        };
    }
    config
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test covers every combination: it mutates BEDEK_LOG_LEVEL, and
    // splitting it up would let parallel tests race on the variable.
    #[test]
    fn test_verbose_flag_sets_level_unless_env_overrides() {
        std::env::remove_var("BEDEK_LOG_LEVEL");
        assert_eq!(effective_log_config(true).level, LogLevel::Debug);
        assert_eq!(effective_log_config(false).level, LogLevel::Warn);

        std::env::set_var("BEDEK_LOG_LEVEL", "error");
        assert_eq!(effective_log_config(true).level, LogLevel::Error);
        assert_eq!(effective_log_config(false).level, LogLevel::Error);
        std::env::remove_var("BEDEK_LOG_LEVEL");
    }
}
