//! Command-line interface for phototidy.
//!
//! Parses arguments, loads configuration, and wires the scanner, pipeline
//! and undo store together. Everything the user sees goes through
//! [`OutputFormatter`].

use crate::config::PipelineConfig;
use crate::file_category::ScanCategory;
use crate::item::Context;
use crate::output::OutputFormatter;
use crate::pipeline::{Pipeline, RunMode, UndoGrouping};
use crate::scanner::Scanner;
use crate::steps::StepKind;
use crate::undo::UndoStore;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "phototidy",
    version,
    about = "Deduplicate, rename, date and file away photo libraries, with undo"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./.phototidy.toml, then ~/.config/phototidy/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run several steps over a directory
    Run(RunArgs),

    /// Run a single step, recorded as its own undo operation
    Step {
        #[arg(value_enum)]
        step: StepKind,

        #[command(flatten)]
        target: RunTarget,
    },

    /// Count the files a run would pick up
    Count {
        path: PathBuf,

        #[arg(long, value_enum)]
        category: Option<ScanCategory>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Revert the most recent run, or a named operation
    Undo {
        source: PathBuf,

        /// Operation id as shown by `history`
        #[arg(long)]
        operation: Option<String>,

        /// Allow undoing an operation that is not the most recent
        #[arg(long)]
        allow_out_of_order: bool,
    },

    /// List recorded undo operations, newest first
    History {
        source: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Forget every recorded undo operation
    ClearHistory { source: PathBuf },

    /// Show undo log statistics
    Stats { source: PathBuf },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: RunTarget,

    /// Steps to run, in order
    #[arg(long, value_enum, value_delimiter = ',')]
    pub steps: Vec<StepKind>,

    #[arg(long, value_enum, default_value_t = ModeArg::Iterative)]
    pub mode: ModeArg,
}

/// Where and how a run operates.
#[derive(Args, Debug)]
pub struct RunTarget {
    /// Directory to organize
    pub source: PathBuf,

    /// Move results under this directory instead of the source
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Show what would change without touching any file
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum)]
    pub category: Option<ScanCategory>,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Plan every step, then execute once
    Batch,
    /// Execute after each step
    Iterative,
}

/// Runs the parsed command.
///
/// # Errors
///
/// Returns a printable message for configuration, path and undo database
/// errors. Per-file failures are reported, not returned.
pub fn run_cli(cli: Cli) -> Result<(), String> {
    let mut config = PipelineConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Error loading configuration: {}", e))?;

    match cli.command {
        Command::Run(args) => {
            let steps = if args.steps.is_empty() {
                StepKind::DEFAULT_ORDER.to_vec()
            } else {
                args.steps
            };
            let mode = match args.mode {
                ModeArg::Batch => RunMode::Batch,
                ModeArg::Iterative => RunMode::Iterative(UndoGrouping::Combined),
            };
            run_pipeline(&args.target, config, &steps, mode)
        }
        Command::Step { step, target } => run_pipeline(
            &target,
            config,
            &[step],
            RunMode::Iterative(UndoGrouping::PerStep),
        ),
        Command::Count {
            path,
            category,
            limit,
        } => {
            apply_scan_overrides(&mut config, category, limit);
            let scanner = Scanner::from_config(&config.scan).map_err(|e| e.to_string())?;
            let (count, truncated) = scanner.scan_count(&path);
            let more = if truncated { " (more available)" } else { "" };
            OutputFormatter::plain(&format!(
                "{}: {}{}",
                config.scan.category.description(),
                count,
                more
            ));
            Ok(())
        }
        Command::Undo {
            source,
            operation,
            allow_out_of_order,
        } => {
            let store = open_store(&source, config)?;
            let report = match operation {
                Some(id) => store.undo_operation(&id, !allow_out_of_order),
                None => store.undo_last_operation(),
            }
            .map_err(|e| e.to_string())?;
            OutputFormatter::undo_report(&report);
            Ok(())
        }
        Command::History { source, json } => {
            let history = open_store(&source, config)?
                .get_history()
                .map_err(|e| e.to_string())?;
            if json {
                let text = serde_json::to_string_pretty(&history).map_err(|e| e.to_string())?;
                OutputFormatter::plain(&text);
            } else {
                OutputFormatter::history(&history);
            }
            Ok(())
        }
        Command::ClearHistory { source } => {
            let removed = open_store(&source, config)?
                .clear_history()
                .map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("Removed {} operations", removed));
            Ok(())
        }
        Command::Stats { source } => {
            let stats = open_store(&source, config)?
                .get_stats()
                .map_err(|e| e.to_string())?;
            OutputFormatter::stats(&stats);
            Ok(())
        }
    }
}

fn apply_scan_overrides(
    config: &mut PipelineConfig,
    category: Option<ScanCategory>,
    limit: Option<usize>,
) {
    if let Some(category) = category {
        config.scan.category = category;
    }
    if limit.is_some() {
        config.scan.limit = limit;
    }
}

fn resolve_source(source: &Path) -> Result<PathBuf, String> {
    fs::canonicalize(source)
        .map_err(|e| format!("Error reading directory {}: {}", source.display(), e))
}

fn open_store(source: &Path, config: PipelineConfig) -> Result<UndoStore, String> {
    let source = resolve_source(source)?;
    let ctx = Context::new(source, None, config, false).map_err(|e| e.to_string())?;
    UndoStore::for_context(&ctx).map_err(|e| format!("Error opening undo log: {}", e))
}

fn run_pipeline(
    target: &RunTarget,
    mut config: PipelineConfig,
    steps: &[StepKind],
    mode: RunMode,
) -> Result<(), String> {
    apply_scan_overrides(&mut config, target.category, target.limit);
    let source = resolve_source(&target.source)?;
    let target_root = target
        .target
        .as_deref()
        .map(std::path::absolute)
        .transpose()
        .map_err(|e| format!("Invalid target directory: {}", e))?;

    let ctx = Context::new(source, target_root, config, target.dry_run)
        .map_err(|e| format!("Invalid configuration: {}", e))?;

    let step_list = steps
        .iter()
        .map(StepKind::id)
        .collect::<Vec<_>>()
        .join(", ");
    if ctx.dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "Planning {} in {}",
            step_list,
            ctx.source_root.display()
        ));
    } else {
        OutputFormatter::info(&format!(
            "Running {} in {}",
            step_list,
            ctx.source_root.display()
        ));
    }

    let store = if ctx.dry_run {
        None
    } else {
        Some(UndoStore::for_context(&ctx).map_err(|e| format!("Error opening undo log: {}", e))?)
    };
    let mut pipeline = Pipeline::from_kinds(&ctx, steps);
    if let Some(store) = &store {
        pipeline = pipeline.with_undo(store);
    }

    let spinner = OutputFormatter::create_spinner("Working...");
    let report = pipeline.scan_and_run(mode);
    spinner.finish_and_clear();
    let report = report.map_err(|e| format!("Invalid configuration: {}", e))?;

    OutputFormatter::run_report(&report);
    if !ctx.dry_run && !report.operation_ids.is_empty() {
        OutputFormatter::plain(&format!(
            "Use 'phototidy undo {}' to revert these changes.",
            ctx.source_root.display()
        ));
    }
    Ok(())
}
