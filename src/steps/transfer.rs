//! Relocates items into the target root and sweeps the emptied source tree.

use super::Step;
use crate::config::LOCAL_CONFIG_FILE;
use crate::item::{Context, FileItem, TRASH_DIR_NAME};
use crate::naming::{NameRegistry, split_name};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const JUNK_FILES: [&str; 3] = [".DS_Store", "Thumbs.db", "desktop.ini"];
const JUNK_DIRS: [&str; 2] = [".Spotlight-V100", ".Trashes"];
const PROTECTED_DIRS: [&str; 1] = [".git"];

/// Transfer step.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStep;

/// Path of `item` relative to the source root, preferring its pending
/// destination.
fn relative_location<'a>(item: &'a FileItem, source_root: &Path) -> Option<&'a Path> {
    item.effective_path()
        .strip_prefix(source_root)
        .or_else(|_| item.current_path.strip_prefix(source_root))
        .ok()
}

fn file_name_of(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

fn is_junk_file(name: &str) -> bool {
    JUNK_FILES.contains(&name) || name.starts_with("._")
}

/// Entries the sweep must never delete or descend into.
fn is_protected(ctx: &Context, path: &Path, name: &str) -> bool {
    if PROTECTED_DIRS.contains(&name) || name == LOCAL_CONFIG_FILE {
        return true;
    }
    if path == ctx.source_root.join(TRASH_DIR_NAME) {
        return true;
    }
    // The undo database and its journal/backup siblings.
    let database = ctx.undo_database_path();
    let db_name = database
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.parent() == database.parent() && !db_name.is_empty() && name.starts_with(&db_name)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

impl Step for TransferStep {
    fn name(&self) -> &'static str {
        "Transfer"
    }

    fn process(&self, ctx: &Context, mut items: Vec<FileItem>) -> Vec<FileItem> {
        let overwrite = ctx.config.transfer.overwrite;
        let mut registry = NameRegistry::new();
        let mut transferred = 0;

        for item in items.iter_mut().filter(|item| !item.is_marked_delete()) {
            let Some(relative) = relative_location(item, &ctx.source_root) else {
                debug!(path = %item.current_path.display(), "outside source root; not transferred");
                continue;
            };
            let destination = ctx.target_root.join(relative);
            let Some(dir) = destination.parent().map(Path::to_path_buf) else {
                continue;
            };
            let name = destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if destination == item.original_path || destination == item.effective_path() {
                registry.claim(&dir, &name);
                continue;
            }

            // Overwrite only replaces files already on disk, never another
            // item's destination.
            if overwrite && !registry.is_claimed(&dir, &name) {
                registry.claim(&dir, &name);
                item.mark_relocate_replacing(destination);
            } else {
                let (stem, ext) = split_name(&name);
                let target: PathBuf = registry.claim_unique(
                    &dir,
                    stem,
                    ext,
                    &[&item.original_path, &item.current_path],
                );
                item.mark_relocate(target);
            }
            transferred += 1;
        }

        info!(transferred, target = %ctx.target_root.display(), "transfer planned");
        items
    }

    /// Removes directories left empty under the source root, bottom-up.
    ///
    /// Hidden directories are left alone unless `cleanup_hidden_files` is set,
    /// in which case junk and hidden files are deleted first. The source root
    /// itself is never removed.
    fn cleanup(&self, ctx: &Context, _items: &[FileItem]) {
        let root = &ctx.source_root;
        if !root.is_dir() {
            return;
        }
        let purge_hidden = ctx.config.transfer.cleanup_hidden_files;
        let mut removed_dirs = 0;
        let mut removed_files = 0;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .contents_first(true)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let name = file_name_of(entry);
                !is_protected(ctx, entry.path(), &name) && (purge_hidden || !name.starts_with('.'))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry during cleanup");
                    continue;
                }
            };
            let name = file_name_of(&entry);
            let path = entry.path();

            if entry.file_type().is_dir() {
                if purge_hidden && JUNK_DIRS.contains(&name.as_str()) {
                    match fs::remove_dir_all(path) {
                        Ok(()) => removed_dirs += 1,
                        Err(e) => warn!(path = %path.display(), error = %e, "could not remove junk folder"),
                    }
                } else if is_empty_dir(path) {
                    match fs::remove_dir(path) {
                        Ok(()) => removed_dirs += 1,
                        Err(e) => debug!(path = %path.display(), error = %e, "could not remove folder"),
                    }
                }
            } else if purge_hidden && (is_junk_file(&name) || name.starts_with('.')) {
                match fs::remove_file(path) {
                    Ok(()) => removed_files += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "could not remove junk file"),
                }
            }
        }

        info!(removed_dirs, removed_files, "source tree cleaned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::item::Action;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        fs::write(path, "content").expect("Failed to write");
    }

    fn context(source: &Path, target: &Path, config: PipelineConfig) -> Context {
        Context::new(source, Some(target.to_path_buf()), config, false).expect("valid context")
    }

    #[test]
    fn test_relative_structure_is_preserved() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("src");
        let target = temp_dir.path().join("dst");
        touch(&source.join("a").join("b.jpg"));
        touch(&source.join("c.jpg"));

        let mut grouped = FileItem::new(source.join("c.jpg"));
        grouped.mark_move(&source.join("2020").join("01"));
        let items = vec![FileItem::new(source.join("a").join("b.jpg")), grouped];

        let ctx = context(&source, &target, PipelineConfig::default());
        let out = TransferStep.process(&ctx, items);
        assert_eq!(out[0].destination_path, Some(target.join("a").join("b.jpg")));
        assert_eq!(
            out[1].destination_path,
            Some(target.join("2020").join("01").join("c.jpg"))
        );
        assert!(out.iter().all(|i| i.action == Action::Move));
    }

    #[test]
    fn test_collision_suffix_unless_overwrite() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("src");
        let target = temp_dir.path().join("dst");
        touch(&source.join("b.jpg"));
        touch(&target.join("b.jpg"));

        let items = vec![FileItem::new(source.join("b.jpg"))];
        let ctx = context(&source, &target, PipelineConfig::default());
        let out = TransferStep.process(&ctx, items.clone());
        assert_eq!(out[0].destination_path, Some(target.join("b_1.jpg")));

        let mut config = PipelineConfig::default();
        config.transfer.overwrite = true;
        let ctx = context(&source, &target, config);
        let out = TransferStep.process(&ctx, items);
        assert_eq!(out[0].destination_path, Some(target.join("b.jpg")));
        assert!(out[0].replaces_existing());
    }

    #[test]
    fn test_overwrite_never_shares_a_destination() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("src");
        let target = temp_dir.path().join("dst");
        touch(&source.join("a.jpg"));
        touch(&source.join("b.jpg"));

        // Both planned onto the same name by an earlier step.
        let mut first = FileItem::new(source.join("a.jpg"));
        first.mark_rename("same.jpg");
        let mut second = FileItem::new(source.join("b.jpg"));
        second.mark_rename("same.jpg");

        let mut config = PipelineConfig::default();
        config.transfer.overwrite = true;
        let ctx = context(&source, &target, config);
        let out = TransferStep.process(&ctx, vec![first, second]);

        assert_eq!(out[0].destination_path, Some(target.join("same.jpg")));
        assert!(out[0].replaces_existing());
        assert_eq!(out[1].destination_path, Some(target.join("same_1.jpg")));
        assert!(!out[1].replaces_existing());
    }

    #[test]
    fn test_same_root_is_a_no_op() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path();
        touch(&source.join("b.jpg"));

        let ctx = context(source, source, PipelineConfig::default());
        let out = TransferStep.process(&ctx, vec![FileItem::new(source.join("b.jpg"))]);
        assert_eq!(out[0].action, Action::None);
    }

    #[test]
    fn test_cleanup_removes_empty_dirs_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path();
        fs::create_dir_all(source.join("empty").join("nested")).expect("Failed to create dirs");
        touch(&source.join("keep").join("file.txt"));
        touch(&source.join("hidden").join(".DS_Store"));
        touch(&source.join(".git").join("config"));

        let ctx = context(source, source, PipelineConfig::default());
        TransferStep.cleanup(&ctx, &[]);

        assert!(source.exists());
        assert!(!source.join("empty").exists());
        assert!(source.join("keep").join("file.txt").exists());
        assert!(source.join("hidden").join(".DS_Store").exists());
        assert!(source.join(".git").join("config").exists());
    }

    #[test]
    fn test_cleanup_purges_junk_when_enabled() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path();
        touch(&source.join("x").join(".DS_Store"));
        touch(&source.join("x").join("._photo.jpg"));
        touch(&source.join("x").join("Thumbs.db"));
        touch(&source.join(".Trashes").join("junk"));
        touch(&source.join(TRASH_DIR_NAME).join("deleted.jpg"));
        touch(&source.join(".phototidy_undo.db"));
        touch(&source.join(".git").join("HEAD"));

        let mut config = PipelineConfig::default();
        config.transfer.cleanup_hidden_files = true;
        let ctx = context(source, source, config);
        TransferStep.cleanup(&ctx, &[]);

        assert!(!source.join("x").exists());
        assert!(!source.join(".Trashes").exists());
        assert!(source.join(TRASH_DIR_NAME).join("deleted.jpg").exists());
        assert!(source.join(".phototidy_undo.db").exists());
        assert!(source.join(".git").join("HEAD").exists());
    }
}
