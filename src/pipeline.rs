//! Orchestrates steps over a scanned item list.
//!
//! Two modes are supported. In batch mode every step plans against the same
//! list without touching the disk and the accumulated plan executes once at
//! the end. In iterative mode each step's plan executes before the next step
//! runs, so later steps see real on-disk locations. During a dry run the
//! iterative mode chains each step's speculative paths into the next.

use crate::config::ConfigError;
use crate::executor::{ExecutionFailure, ExecutionReport, execute, separate_destinations};
use crate::item::{Action, Context, FileItem, META_EXECUTION_ERROR};
use crate::scanner::Scanner;
use crate::steps::{PipelineStep, Step, StepKind};
use crate::undo::{ChangeRecord, UndoStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use uuid::Uuid;

/// How iterative runs are recorded in the undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoGrouping {
    /// One operation per executed step, labelled with the step id.
    PerStep,
    /// One `summary` operation for the whole run.
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Batch,
    Iterative(UndoGrouping),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Planned only (dry run).
    Planned,
    Applied,
    Failed,
}

/// A user-facing line describing one planned or executed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    #[serde(skip)]
    pub path: PathBuf,
    /// Location before the step, relative to the source root.
    pub original: String,
    /// `deleted`, the new file name, or the new location.
    pub new: String,
    pub action: Action,
    pub status: ChangeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: StepKind,
    pub name: &'static str,
    pub changes: Vec<ChangeEntry>,
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
    pub failures: Vec<ExecutionFailure>,
    /// Undo operations recorded by this run.
    pub operation_ids: Vec<String>,
    /// Undo log write errors. The file changes themselves still happened.
    pub undo_errors: Vec<String>,
    /// Final state of every surviving item.
    #[serde(skip)]
    pub items: Vec<FileItem>,
}

impl RunReport {
    pub fn total_changes(&self) -> usize {
        self.steps.iter().map(|s| s.changes.len()).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.failures.len()
    }

    /// Number of change entries per action, keyed by the action name.
    pub fn action_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.steps.iter().flat_map(|s| &s.changes) {
            *counts.entry(entry.action.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

fn relative_display(path: &Path, roots: &[&Path]) -> String {
    roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

type PlanSnapshot = HashMap<PathBuf, (Action, Option<PathBuf>)>;

fn snapshot(items: &[FileItem]) -> PlanSnapshot {
    items
        .iter()
        .map(|item| {
            (
                item.original_path.clone(),
                (item.action, item.destination_path.clone()),
            )
        })
        .collect()
}

/// Entries for every item whose plan changed since `before`.
fn planned_entries(ctx: &Context, before: &PlanSnapshot, items: &[FileItem]) -> Vec<ChangeEntry> {
    items
        .iter()
        .filter(|item| item.action != Action::None)
        .filter(|item| {
            before.get(&item.original_path)
                != Some(&(item.action, item.destination_path.clone()))
        })
        .map(|item| ChangeEntry {
            path: item.original_path.clone(),
            original: relative_display(&item.original_path, &[&ctx.source_root]),
            new: planned_target(ctx, item),
            action: item.action,
            status: ChangeStatus::Planned,
        })
        .collect()
}

fn planned_target(ctx: &Context, item: &FileItem) -> String {
    match item.action {
        Action::Delete => "deleted".to_string(),
        Action::Rename => item.name(),
        _ => relative_display(
            item.effective_path(),
            &[&ctx.target_root, &ctx.source_root],
        ),
    }
}

fn settle_entries(entries: &mut [ChangeEntry], execution: &ExecutionReport) {
    let failed: HashSet<&Path> = execution.failures.iter().map(|f| f.path.as_path()).collect();
    for entry in entries {
        entry.status = if failed.contains(entry.path.as_path()) {
            ChangeStatus::Failed
        } else {
            ChangeStatus::Applied
        };
    }
}

/// Unique undo operation id, e.g. `group_1a2b3c4d`.
fn operation_id(label: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", label, &suffix[..8])
}

/// Runs a sequence of steps against one context.
pub struct Pipeline<'a> {
    ctx: &'a Context,
    steps: Vec<PipelineStep>,
    undo: Option<&'a UndoStore>,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a Context, steps: Vec<PipelineStep>) -> Self {
        Self {
            ctx,
            steps,
            undo: None,
        }
    }

    /// Builds a pipeline from step identifiers, in the given order.
    pub fn from_kinds(ctx: &'a Context, kinds: &[StepKind]) -> Self {
        Self::new(ctx, kinds.iter().map(StepKind::build).collect())
    }

    /// Records executed changes in `store`.
    pub fn with_undo(mut self, store: &'a UndoStore) -> Self {
        self.undo = Some(store);
        self
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(PipelineStep::kind).collect()
    }

    /// Scans the source root with the configured filters, then runs.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the exclude patterns are invalid.
    pub fn scan_and_run(&self, mode: RunMode) -> Result<RunReport, ConfigError> {
        let scanner = Scanner::from_config(&self.ctx.config.scan)?;
        let items = scanner.scan(&self.ctx.source_root);
        info!(files = items.len(), root = %self.ctx.source_root.display(), "scan finished");
        Ok(self.run(items, mode))
    }

    pub fn run(&self, items: Vec<FileItem>, mode: RunMode) -> RunReport {
        let mut report = RunReport {
            dry_run: self.ctx.dry_run,
            ..RunReport::default()
        };
        report.items = match mode {
            RunMode::Batch => self.run_batch(items, &mut report),
            RunMode::Iterative(grouping) => self.run_iterative(items, grouping, &mut report),
        };
        info!(
            changes = report.total_changes(),
            failures = report.total_failures(),
            dry_run = self.ctx.dry_run,
            "pipeline finished"
        );
        report
    }

    fn run_batch(&self, mut items: Vec<FileItem>, report: &mut RunReport) -> Vec<FileItem> {
        for step in &self.steps {
            let before = snapshot(&items);
            items = step.process(self.ctx, items);
            let changes = planned_entries(self.ctx, &before, &items);
            info!(step = step.name(), planned = changes.len(), "step planned");
            report.steps.push(StepReport {
                step: step.kind(),
                name: step.name(),
                changes,
            });
        }

        // Steps plan independently, so two of them may pick the same path.
        for path in separate_destinations(&mut items) {
            let Some(item) = items.iter().find(|item| item.original_path == path) else {
                continue;
            };
            let latest = report
                .steps
                .iter_mut()
                .rev()
                .find_map(|s| s.changes.iter_mut().find(|entry| entry.path == path));
            if let Some(entry) = latest {
                entry.new = planned_target(self.ctx, item);
            }
        }
        if self.ctx.dry_run {
            return items;
        }

        let (items, execution) = execute(self.ctx, items);
        for step_report in &mut report.steps {
            settle_entries(&mut step_report.changes, &execution);
        }
        self.record(operation_id("batch"), &execution.changes, report);
        report.failures.extend(execution.failures);

        for step in &self.steps {
            step.cleanup(self.ctx, &items);
        }
        items
    }

    fn run_iterative(
        &self,
        mut items: Vec<FileItem>,
        grouping: UndoGrouping,
        report: &mut RunReport,
    ) -> Vec<FileItem> {
        let mut combined: Vec<ChangeRecord> = Vec::new();

        for step in &self.steps {
            for item in items.iter_mut() {
                item.reset_action();
                item.metadata.remove(META_EXECUTION_ERROR);
            }
            let before = snapshot(&items);
            items = step.process(self.ctx, items);
            let mut changes = planned_entries(self.ctx, &before, &items);
            info!(step = step.name(), planned = changes.len(), "step planned");

            if self.ctx.dry_run {
                items.retain(|item| !item.is_marked_delete());
            } else {
                let (executed, execution) = execute(self.ctx, items);
                items = executed;
                settle_entries(&mut changes, &execution);
                match grouping {
                    UndoGrouping::PerStep => {
                        self.record(operation_id(step.kind().id()), &execution.changes, report)
                    }
                    UndoGrouping::Combined => combined.extend(execution.changes),
                }
                report.failures.extend(execution.failures);
                step.cleanup(self.ctx, &items);
            }

            report.steps.push(StepReport {
                step: step.kind(),
                name: step.name(),
                changes,
            });
        }

        if grouping == UndoGrouping::Combined {
            self.record(operation_id("summary"), &combined, report);
        }
        items
    }

    fn record(&self, id: String, changes: &[ChangeRecord], report: &mut RunReport) {
        let Some(store) = self.undo else {
            return;
        };
        if changes.is_empty() {
            return;
        }
        match store.save_operation(&id, changes) {
            Ok(()) => report.operation_ids.push(id),
            Err(e) => {
                error!(operation = %id, error = %e, "failed to record undo operation");
                report.undo_errors.push(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupStructure, PipelineConfig};
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        fs::write(path, content).expect("Failed to write");
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.prefix.add_timestamp = false;
        config
    }

    fn context(root: &Path, dry_run: bool) -> Context {
        Context::new(root, None, config(), dry_run).expect("valid context")
    }

    #[test]
    fn test_operation_id_shape() {
        let id = operation_id("group");
        assert!(id.starts_with("group_"));
        assert_eq!(id.len(), "group_".len() + 8);
        assert_ne!(id, operation_id("group"));
    }

    #[test]
    fn test_dry_run_chains_without_touching_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(&root.join("2024-03-05_beach.JPEG"), "a");

        let ctx = context(root, true);
        let pipeline = Pipeline::from_kinds(&ctx, &[StepKind::Filename, StepKind::Group]);
        let report = pipeline.scan_and_run(RunMode::Iterative(UndoGrouping::Combined))
            .expect("scan succeeds");

        assert!(report.dry_run);
        assert_eq!(report.steps[0].changes[0].new, "2024-03-05_beach.jpg");
        assert_eq!(report.steps[1].changes[0].original, "2024-03-05_beach.JPEG");
        assert_eq!(
            Path::new(&report.steps[1].changes[0].new),
            Path::new("2024").join("03").join("2024-03-05_beach.jpg")
        );
        assert!(report.steps.iter().flat_map(|s| &s.changes).all(|c| c.status == ChangeStatus::Planned));
        assert!(root.join("2024-03-05_beach.JPEG").exists());
        assert!(!root.join("2024").exists());
    }

    #[test]
    fn test_iterative_combined_records_one_operation() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(&root.join("2024-03-05_beach.jpg"), "same");
        write(&root.join("2024-03-05_beach (1).jpg"), "same");

        let ctx = context(root, false);
        let store = UndoStore::for_context(&ctx).expect("store opens");
        let pipeline = Pipeline::from_kinds(&ctx, &[StepKind::Deduplicate, StepKind::Group])
            .with_undo(&store);
        let report = pipeline.scan_and_run(RunMode::Iterative(UndoGrouping::Combined))
            .expect("scan succeeds");

        assert_eq!(report.operation_ids.len(), 1);
        assert!(report.operation_ids[0].starts_with("summary_"));
        assert_eq!(report.items.len(), 1);
        assert!(root.join("2024").join("03").join("2024-03-05_beach.jpg").exists());
        assert!(!root.join("2024-03-05_beach (1).jpg").exists());

        let history = store.get_history().expect("history");
        assert_eq!(history[0].changes.len(), 2);
        assert_eq!(history[0].changes[0].action, Action::Delete);
    }

    #[test]
    fn test_iterative_per_step_labels_operations() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(&root.join("2021-06-01 party.TXT"), "x");

        let ctx = context(root, false);
        let store = UndoStore::for_context(&ctx).expect("store opens");
        let pipeline = Pipeline::from_kinds(&ctx, &[StepKind::Filename, StepKind::Group])
            .with_undo(&store);
        let report = pipeline.run(
            vec![FileItem::new(root.join("2021-06-01 party.TXT"))],
            RunMode::Iterative(UndoGrouping::PerStep),
        );

        assert_eq!(report.operation_ids.len(), 2);
        assert!(report.operation_ids[0].starts_with("filename_"));
        assert!(report.operation_ids[1].starts_with("group_"));
        assert!(root.join("2021").join("06").join("2021-06-01 party.txt").exists());

        // Newest first: undoing the group operation only moves the file back.
        store.undo_last_operation().expect("undo runs");
        assert!(root.join("2021-06-01 party.txt").exists());
    }

    #[test]
    fn test_batch_executes_once() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(&root.join("2020-01-02.TXT"), "x");

        let mut config = config();
        config.group.structure = GroupStructure::Year;
        let ctx = Context::new(root, None, config, false).expect("valid context");
        let store = UndoStore::for_context(&ctx).expect("store opens");
        let pipeline = Pipeline::from_kinds(&ctx, &[StepKind::Filename, StepKind::Group])
            .with_undo(&store);
        let report = pipeline.scan_and_run(RunMode::Batch).expect("scan succeeds");

        assert_eq!(report.operation_ids.len(), 1);
        assert!(report.operation_ids[0].starts_with("batch_"));
        assert!(root.join("2020").join("2020-01-02.txt").exists());

        let history = store.get_history().expect("history");
        assert_eq!(history[0].changes.len(), 1);
        assert_eq!(history[0].changes[0].action, Action::Move);
        assert_eq!(report.action_counts().get("MOVE"), Some(&1));
        assert_eq!(report.action_counts().get("RENAME"), Some(&1));
    }

    #[test]
    fn test_failures_are_reported_not_recorded() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(&root.join("a.TXT"), "x");

        let ctx = context(root, false);
        let store = UndoStore::for_context(&ctx).expect("store opens");
        // Scanned, then removed before execution.
        let items = vec![FileItem::new(root.join("a.TXT"))];
        fs::remove_file(root.join("a.TXT")).expect("Failed to remove");

        let report = Pipeline::from_kinds(&ctx, &[StepKind::Filename])
            .with_undo(&store)
            .run(items, RunMode::Iterative(UndoGrouping::PerStep));
        assert_eq!(report.total_failures(), 1);
        assert_eq!(report.steps[0].changes[0].status, ChangeStatus::Failed);
        assert!(report.operation_ids.is_empty());
        assert_eq!(store.get_stats().expect("stats").operation_count, 0);
    }
}
