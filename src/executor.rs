//! Realizes planned actions on disk.
//!
//! Deletions run first and move files into the undo trash under the source
//! root, then renames and moves run in list order. Every item is attempted
//! independently: a failure rolls that item back to its on-disk location and
//! is reported, while the remaining items still execute. Only successful
//! mutations become undo change records.

use crate::item::{Action, Context, FileItem, META_EXECUTION_ERROR};
use crate::naming::{NameRegistry, counter_name, split_name};
use crate::undo::ChangeRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while moving a single file.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Failed to create a destination directory.
    #[error("Failed to create directory {}: {error}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
    /// The move itself failed.
    #[error("Failed to move {} to {}: {error}", from.display(), to.display())]
    FileMoveFailure {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: io::Error,
    },
    /// A different file already occupies the destination.
    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    /// The file to move is no longer there.
    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),
}

/// Result type for file moves.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// One item whose action could not be carried out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionFailure {
    pub path: PathBuf,
    pub action: Action,
    pub reason: String,
}

/// Outcome of one execution pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Successful mutations, in execution order.
    pub changes: Vec<ChangeRecord>,
    pub failures: Vec<ExecutionFailure>,
}

#[cfg(unix)]
fn is_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Moves `from` to `to`, creating parent directories as needed.
///
/// An existing file at `to` is only replaced when `overwrite` is set; a
/// case-only rename of the same file is always allowed. Moves across devices
/// fall back to copy and remove.
///
/// # Errors
///
/// Returns an [`OrganizeError`] describing the first step that failed.
pub fn move_file(from: &Path, to: &Path, overwrite: bool) -> OrganizeResult<()> {
    if !from.exists() {
        return Err(OrganizeError::SourceMissing(from.to_path_buf()));
    }
    if to.exists() && !overwrite && !is_same_file(from, to) {
        return Err(OrganizeError::DestinationExists(to.to_path_buf()));
    }

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|error| OrganizeError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            error,
        })?;
    }

    let move_failure = |error| OrganizeError::FileMoveFailure {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error,
    };
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), to = %to.display(), "cross-device move; copying");
            fs::copy(from, to).map_err(move_failure)?;
            fs::remove_file(from).map_err(move_failure)
        }
        Err(e) => Err(move_failure(e)),
    }
}

/// Free location in the undo trash for a file being deleted.
///
/// The path mirrors the file's location under the source root; an occupied
/// slot gets a `_n` counter.
pub fn trash_path(ctx: &Context, original: &Path) -> PathBuf {
    let trash = ctx.trash_dir();
    let relative = original
        .strip_prefix(&ctx.source_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| original.file_name().map(PathBuf::from).unwrap_or_default());
    let candidate = trash.join(relative);
    if !candidate.exists() {
        return candidate;
    }

    let name = candidate
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_name(&name);
    let dir = candidate.parent().unwrap_or(&trash).to_path_buf();
    (1..)
        .map(|n| dir.join(counter_name(stem, ext, n)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn record_failure(item: &mut FileItem, error: &OrganizeError, report: &mut ExecutionReport) {
    warn!(path = %item.original_path.display(), error = %error, "action failed; file left in place");
    report.failures.push(ExecutionFailure {
        path: item.original_path.clone(),
        action: item.action,
        reason: error.to_string(),
    });
    item.metadata.insert(
        META_EXECUTION_ERROR.to_string(),
        Value::String(error.to_string()),
    );
    item.roll_back();
}

/// Gives every pending rename or move a destination no other item plans.
///
/// The first item planning a path keeps it. Later ones are redirected to the
/// first free `_n` name in the same folder and lose any permission to replace
/// an existing file. Returns the original paths of redirected items.
pub fn separate_destinations(items: &mut [FileItem]) -> Vec<PathBuf> {
    let mut registry = NameRegistry::new();
    let mut clashing = Vec::new();

    for (index, item) in items.iter().enumerate() {
        if !matches!(item.action, Action::Rename | Action::Move) {
            continue;
        }
        let Some((dir, name)) = item.destination_path.as_deref().and_then(dir_and_name) else {
            continue;
        };
        if registry.is_claimed(&dir, &name) {
            clashing.push(index);
        } else {
            registry.claim(&dir, &name);
        }
    }

    let mut redirected = Vec::with_capacity(clashing.len());
    for index in clashing {
        let item = &mut items[index];
        let Some((dir, name)) = item.destination_path.as_deref().and_then(dir_and_name) else {
            continue;
        };
        let (stem, ext) = split_name(&name);
        let resolved = registry.claim_unique(&dir, stem, ext, &[&item.original_path]);
        warn!(
            path = %item.original_path.display(),
            planned = %name,
            resolved = %resolved.display(),
            "destination planned twice; renamed"
        );
        item.redirect(resolved);
        redirected.push(item.original_path.clone());
    }
    redirected
}

fn dir_and_name(path: &Path) -> Option<(PathBuf, String)> {
    let dir = path.parent()?.to_path_buf();
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some((dir, name))
}

/// Applies every item's pending action. A dry run returns the items
/// untouched with an empty report.
///
/// Only moves planned by Transfer with overwrite enabled may replace an
/// existing file, and never one produced earlier in the same call.
///
/// Returned items reflect the new on-disk state: executed deletions are
/// dropped, moved items now start from their destination, and failed items
/// point back at their unchanged location.
pub fn execute(ctx: &Context, mut items: Vec<FileItem>) -> (Vec<FileItem>, ExecutionReport) {
    let mut report = ExecutionReport::default();
    if ctx.dry_run {
        return (items, report);
    }
    let mut trashed = vec![false; items.len()];

    for (index, item) in items.iter_mut().enumerate() {
        if item.action != Action::Delete {
            continue;
        }
        let original = item.original_path.clone();
        let trash = trash_path(ctx, &original);
        match move_file(&original, &trash, false) {
            Ok(()) => {
                debug!(path = %original.display(), trash = %trash.display(), "moved to trash");
                item.destination_path = Some(trash.clone());
                report
                    .changes
                    .push(ChangeRecord::new(original, trash, Action::Delete));
                trashed[index] = true;
            }
            Err(e) => record_failure(item, &e, &mut report),
        }
    }

    // Paths created by this call; nothing may replace them.
    let mut produced: HashSet<PathBuf> = HashSet::new();
    for item in items.iter_mut() {
        if !matches!(item.action, Action::Rename | Action::Move) {
            continue;
        }
        let Some(destination) = item.destination_path.clone() else {
            item.roll_back();
            continue;
        };
        let original = item.original_path.clone();
        if destination == original {
            item.settle_at(destination);
            continue;
        }
        if produced.contains(&destination) {
            record_failure(item, &OrganizeError::DestinationExists(destination), &mut report);
            continue;
        }
        match move_file(&original, &destination, item.replaces_existing()) {
            Ok(()) => {
                produced.insert(destination.clone());
                debug!(from = %original.display(), to = %destination.display(), "moved");
                report
                    .changes
                    .push(ChangeRecord::new(original, destination.clone(), item.action));
                item.settle_at(destination);
            }
            Err(e) => record_failure(item, &e, &mut report),
        }
    }

    let survivors = items
        .into_iter()
        .zip(trashed)
        .filter_map(|(item, gone)| (!gone).then_some(item))
        .collect();

    info!(
        changes = report.changes.len(),
        failures = report.failures.len(),
        "execution finished"
    );
    (survivors, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::TempDir;

    fn context(root: &Path, dry_run: bool) -> Context {
        Context::new(root, None, PipelineConfig::default(), dry_run).expect("valid context")
    }

    fn touch(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        fs::write(path, content).expect("Failed to write");
    }

    #[test]
    fn test_move_file_creates_parents() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let from = temp_dir.path().join("a.txt");
        let to = temp_dir.path().join("x").join("y").join("a.txt");
        touch(&from, "a");

        move_file(&from, &to, false).expect("move succeeds");
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "a");
    }

    #[test]
    fn test_move_file_refuses_occupied_destination() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let from = temp_dir.path().join("a.txt");
        let to = temp_dir.path().join("b.txt");
        touch(&from, "a");
        touch(&to, "b");

        let result = move_file(&from, &to, false);
        assert!(matches!(result, Err(OrganizeError::DestinationExists(_))));
        assert!(from.exists());

        move_file(&from, &to, true).expect("overwrite succeeds");
        assert_eq!(fs::read_to_string(&to).unwrap(), "a");
    }

    #[test]
    fn test_move_file_missing_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = move_file(
            &temp_dir.path().join("gone.txt"),
            &temp_dir.path().join("b.txt"),
            false,
        );
        assert!(matches!(result, Err(OrganizeError::SourceMissing(_))));
    }

    #[test]
    fn test_trash_path_mirrors_and_disambiguates() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let ctx = context(root, false);
        let original = root.join("sub").join("a.jpg");

        let first = trash_path(&ctx, &original);
        assert_eq!(first, root.join(".undo_trash").join("sub").join("a.jpg"));
        touch(&first, "old");
        assert_eq!(
            trash_path(&ctx, &original),
            root.join(".undo_trash").join("sub").join("a_1.jpg")
        );
    }

    #[test]
    fn test_execute_applies_deletes_and_moves() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(&root.join("dup.jpg"), "x");
        touch(&root.join("keep.jpg"), "y");

        let mut dup = FileItem::new(root.join("dup.jpg"));
        dup.mark_delete();
        let mut keep = FileItem::new(root.join("keep.jpg"));
        keep.mark_move(&root.join("2020"));

        let (items, report) = execute(&context(root, false), vec![dup, keep]);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].original_path, root.join("2020").join("keep.jpg"));
        assert_eq!(items[0].action, Action::None);
        assert_eq!(report.changes.len(), 2);
        assert_eq!(report.changes[0].action, Action::Delete);
        assert!(root.join(".undo_trash").join("dup.jpg").exists());
        assert!(root.join("2020").join("keep.jpg").exists());
    }

    #[test]
    fn test_execute_failure_rolls_back_item() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(&root.join("a.jpg"), "a");
        touch(&root.join("b.jpg"), "b");

        let mut item = FileItem::new(root.join("a.jpg"));
        item.mark_rename("b.jpg");
        let (items, report) = execute(&context(root, false), vec![item]);

        assert!(report.changes.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(items[0].current_path, root.join("a.jpg"));
        assert!(items[0].metadata.contains_key(META_EXECUTION_ERROR));
        assert_eq!(fs::read_to_string(root.join("b.jpg")).unwrap(), "b");
    }

    #[test]
    fn test_overwrite_setting_does_not_leak_into_renames() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(&root.join("a.jpg"), "a");
        touch(&root.join("b.jpg"), "b");

        let mut config = PipelineConfig::default();
        config.transfer.overwrite = true;
        let ctx = Context::new(root, None, config, false).expect("valid context");
        let mut item = FileItem::new(root.join("a.jpg"));
        item.mark_rename("b.jpg");
        let (_, report) = execute(&ctx, vec![item]);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(fs::read_to_string(root.join("b.jpg")).unwrap(), "b");
    }

    #[test]
    fn test_replacing_move_never_hits_a_produced_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(&root.join("a.jpg"), "a");
        touch(&root.join("b.jpg"), "b");

        let mut first = FileItem::new(root.join("a.jpg"));
        first.mark_relocate(root.join("out").join("x.jpg"));
        let mut second = FileItem::new(root.join("b.jpg"));
        second.mark_relocate_replacing(root.join("out").join("x.jpg"));
        let (_, report) = execute(&context(root, false), vec![first, second]);

        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(fs::read_to_string(root.join("out").join("x.jpg")).unwrap(), "a");
        assert_eq!(fs::read_to_string(root.join("b.jpg")).unwrap(), "b");
    }

    #[test]
    fn test_separate_destinations_renames_later_claims() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(&root.join("X_1.jpg"), "taken");

        let mut first = FileItem::new(root.join("a.jpg"));
        first.mark_rename("x.jpg");
        let mut second = FileItem::new(root.join("sub").join("b.jpg"));
        second.mark_relocate_replacing(root.join("X.jpg"));
        let mut third = FileItem::new(root.join("c.jpg"));
        third.mark_rename("y.jpg");
        let mut items = vec![first, second, third];

        let redirected = separate_destinations(&mut items);

        assert_eq!(redirected, vec![root.join("sub").join("b.jpg")]);
        assert_eq!(items[0].destination_path, Some(root.join("x.jpg")));
        assert_eq!(items[1].destination_path, Some(root.join("X_2.jpg")));
        assert_eq!(items[1].action, Action::Move);
        assert!(!items[1].replaces_existing());
        assert_eq!(items[2].destination_path, Some(root.join("y.jpg")));
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        touch(&root.join("a.jpg"), "a");
        let mut item = FileItem::new(root.join("a.jpg"));
        item.mark_delete();

        let (items, report) = execute(&context(root, true), vec![item]);
        assert!(report.changes.is_empty());
        assert!(items[0].is_marked_delete());
        assert!(root.join("a.jpg").exists());
    }
}
