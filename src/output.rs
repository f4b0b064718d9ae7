//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output: colored status lines,
//! a spinner for long runs, and tables for run reports, undo history and
//! undo results. Diagnostics go through `tracing`; this module is only for
//! what the user asked to see.

use crate::pipeline::{ChangeStatus, RunReport, StepReport};
use crate::undo::{OperationRecord, UndoReport, UndoStats};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Duration;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Per-step change tables and summaries
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use phototidy::output::OutputFormatter;
    /// OutputFormatter::success("Undone 3 changes");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a ticking spinner for work of unknown length.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use phototidy::output::OutputFormatter;
    /// let spinner = OutputFormatter::create_spinner("Planning...");
    /// spinner.finish_and_clear();
    /// ```
    pub fn create_spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Prints the changes planned or applied by one step.
    pub fn change_table(step: &StepReport) {
        Self::header(&format!("{} ({})", step.name, step.changes.len()));
        if step.changes.is_empty() {
            println!("  {}", "no changes".dimmed());
            return;
        }

        let width = step
            .changes
            .iter()
            .map(|c| c.original.len())
            .max()
            .unwrap_or(0)
            .max(8);
        for change in &step.changes {
            let marker = match change.status {
                ChangeStatus::Planned => "→".yellow(),
                ChangeStatus::Applied => "✓".green(),
                ChangeStatus::Failed => "✗".red(),
            };
            println!(
                "  {} {:<7} {:<width$} → {}",
                marker,
                change.action.as_str(),
                change.original,
                change.new,
                width = width
            );
        }
    }

    /// Prints a summary table with change counts by action.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use phototidy::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("MOVE".to_string(), 15);
    /// counts.insert("DELETE".to_string(), 2);
    /// OutputFormatter::summary_table(&counts, 17);
    /// ```
    pub fn summary_table(action_counts: &BTreeMap<String, usize>, total_changes: usize) {
        Self::header("SUMMARY");

        let max_action_len = action_counts
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(6);

        println!(
            "{:<width$} | {}",
            "Action".bold(),
            "Files".bold(),
            width = max_action_len
        );
        println!("{}", "-".repeat(max_action_len + 10));
        for (action, count) in action_counts {
            let file_word = if *count == 1 { "file" } else { "files" };
            println!(
                "{:<width$} | {} {}",
                action,
                count.to_string().green(),
                file_word,
                width = max_action_len
            );
        }
        println!("{}", "-".repeat(max_action_len + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_changes.to_string().green().bold(),
            if total_changes == 1 { "file" } else { "files" },
            width = max_action_len
        );
    }

    /// Prints every step's changes, the failures and the summary of a run.
    pub fn run_report(report: &RunReport) {
        for step in &report.steps {
            Self::change_table(step);
        }

        if !report.failures.is_empty() {
            Self::header("FAILURES");
            for failure in &report.failures {
                Self::error(&format!(
                    "{} {}: {}",
                    failure.action,
                    failure.path.display(),
                    failure.reason
                ));
            }
        }

        Self::summary_table(&report.action_counts(), report.total_changes());

        if report.dry_run {
            Self::dry_run_notice("No files were modified.");
            return;
        }
        for id in &report.operation_ids {
            Self::info(&format!("Recorded undo operation {}", id));
        }
        for error in &report.undo_errors {
            Self::warning(&format!("Changes were applied but not recorded: {}", error));
        }
    }

    /// Prints the outcome of an undo.
    pub fn undo_report(report: &UndoReport) {
        if report.is_complete_success() {
            Self::success(&report.message);
        } else if report.success {
            Self::warning(&report.message);
        } else {
            Self::error(&report.message);
        }
        for (path, reason) in &report.failed_restores {
            eprintln!("    - {}: {}", path.display(), reason);
        }
        for backup in &report.backups {
            Self::plain(&format!("    backed up: {}", backup.display()));
        }
    }

    /// Prints stored undo operations, newest first.
    pub fn history(operations: &[OperationRecord]) {
        if operations.is_empty() {
            Self::info("No recorded operations.");
            return;
        }
        for op in operations {
            Self::header(&format!("{}  {}", op.operation_id, op.timestamp.as_str().dimmed()));
            for change in &op.changes {
                println!(
                    "  {:<7} {} → {}",
                    change.action.as_str(),
                    change.original_path.display(),
                    change.new_path.display()
                );
            }
        }
    }

    pub fn stats(stats: &UndoStats) {
        Self::header("UNDO LOG");
        println!("  Database:   {}", stats.db_path.display());
        println!("  Operations: {}", stats.operation_count.to_string().green());
        println!("  Changes:    {}", stats.change_count.to_string().green());
        println!("  Size:       {} bytes", stats.db_size_bytes);
    }
}
