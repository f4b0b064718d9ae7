//! Flattens timestamp-named folders into their parent.
//!
//! A folder called `2024-05-20 1-30-00PM` holding `a.jpg` and `b.jpg` becomes
//! two files in the parent folder named after that moment, one microsecond
//! apart so they never collide. After execution the derived time is written
//! back into each file and the emptied folder is removed.

use super::Step;
use crate::item::{
    Context, FileItem, META_EXECUTION_ERROR, META_STANDARDIZED_AT, META_STANDARDIZED_FROM,
};
use crate::naming::{NameRegistry, split_name};
use crate::timestamp::{
    TimestampFormatter, parse_filename_timestamp, parse_folder_timestamp, write_back,
};
use chrono::{Duration, NaiveDateTime};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const METADATA_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Standardize step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardizeStep;

/// Where files of `folder` are flattened to: its parent while that is still
/// inside the source root, otherwise the source root itself.
fn flatten_target(folder: &Path, source_root: &Path) -> PathBuf {
    match folder.parent() {
        Some(parent) if parent.starts_with(source_root) => parent.to_path_buf(),
        _ => source_root.to_path_buf(),
    }
}

impl Step for StandardizeStep {
    fn name(&self) -> &'static str {
        "Standardize"
    }

    fn process(&self, ctx: &Context, mut items: Vec<FileItem>) -> Vec<FileItem> {
        let formatter = TimestampFormatter::from_config(&ctx.config.timestamp_format);
        let fallback = ctx.config.standardize.use_filename_fallback;

        let mut folder_index: HashMap<PathBuf, usize> = HashMap::new();
        let mut folders: Vec<(PathBuf, Vec<usize>)> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if item.is_marked_delete() {
                continue;
            }
            let parent = item
                .current_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            match folder_index.get(&parent) {
                Some(&pos) => folders[pos].1.push(index),
                None => {
                    folder_index.insert(parent.clone(), folders.len());
                    folders.push((parent, vec![index]));
                }
            }
        }

        let mut registry = NameRegistry::new();
        let mut planned = 0;
        for (folder, mut members) in folders {
            let folder_name = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let folder_time = parse_folder_timestamp(&folder_name);
            if folder_time.is_none() && !fallback {
                debug!(folder = %folder.display(), "folder name carries no timestamp");
                continue;
            }

            members.sort_by_key(|&i| items[i].name());
            let dest_dir = flatten_target(&folder, &ctx.source_root);

            for (position, &index) in members.iter().enumerate() {
                let item = &mut items[index];
                let base = match folder_time.or_else(|| parse_filename_timestamp(&item.name())) {
                    Some(dt) => dt,
                    None => {
                        debug!(path = %item.current_path.display(), "no usable timestamp; left in place");
                        continue;
                    }
                };
                let offset = i64::try_from(position + 1).unwrap_or(i64::MAX);
                let stamp = base + Duration::microseconds(offset);

                let name = item.name();
                let (_, ext) = split_name(&name);
                let target = registry.claim_unique(
                    &dest_dir,
                    &formatter.format(&stamp),
                    ext,
                    &[&item.original_path, &item.current_path],
                );

                item.metadata.insert(
                    META_STANDARDIZED_AT.to_string(),
                    Value::String(stamp.format(METADATA_TIME_FORMAT).to_string()),
                );
                item.metadata.insert(
                    META_STANDARDIZED_FROM.to_string(),
                    Value::String(folder.to_string_lossy().into_owned()),
                );
                if target != item.current_path {
                    item.mark_relocate(target);
                    planned += 1;
                }
            }
        }

        info!(planned, "standardize planned");
        items
    }

    /// Writes derived times back into the moved files, then removes the
    /// folders they came from if those are now empty.
    fn cleanup(&self, ctx: &Context, items: &[FileItem]) {
        let mut emptied: BTreeSet<PathBuf> = BTreeSet::new();

        for item in items {
            if item.metadata.contains_key(META_EXECUTION_ERROR) {
                continue;
            }
            let Some(stamp) = item
                .metadata
                .get(META_STANDARDIZED_AT)
                .and_then(Value::as_str)
                .and_then(|s| NaiveDateTime::parse_from_str(s, METADATA_TIME_FORMAT).ok())
            else {
                continue;
            };
            if item.original_path.is_file() {
                write_back(&item.original_path, &stamp);
            }
            if let Some(from) = item.metadata.get(META_STANDARDIZED_FROM).and_then(Value::as_str) {
                emptied.insert(PathBuf::from(from));
            }
        }

        // Reverse order visits nested folders before their parents.
        for folder in emptied.iter().rev() {
            if folder == &ctx.source_root || !folder.starts_with(&ctx.source_root) {
                continue;
            }
            let is_empty = fs::read_dir(folder)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                continue;
            }
            match fs::remove_dir(folder) {
                Ok(()) => info!(folder = %folder.display(), "removed empty folder"),
                Err(e) => warn!(folder = %folder.display(), error = %e, "could not remove folder"),
            }
        }
    }
}
