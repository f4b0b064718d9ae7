//! Files items into `YYYY/` or `YYYY/MM/` folders under the source root.
//!
//! Undated files stay where they are; no "today" bucket is invented.

use super::Step;
use crate::config::GroupStructure;
use crate::item::{Context, FileItem};
use crate::naming::{NameRegistry, split_name};
use crate::timestamp::{creation_time, exif_datetime};
use chrono::Datelike;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

static GROUP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})").expect("valid group regex")
});

/// Year and month from a stem starting with `YYYY-M-D`.
fn filename_year_month(stem: &str) -> Option<(i32, u32)> {
    let caps = GROUP_PATTERN.captures(stem)?;
    let year = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

fn item_year_month(item: &FileItem, prioritize_filename: bool) -> Option<(i32, u32)> {
    if prioritize_filename {
        let name = item.name();
        let (stem, _) = split_name(&name);
        if let Some(found) = filename_year_month(stem) {
            return Some(found);
        }
    }
    exif_datetime(&item.original_path)
        .or_else(|| creation_time(&item.original_path))
        .map(|dt| (dt.year(), dt.month()))
}

fn group_folder(root: &Path, structure: GroupStructure, year: i32, month: u32) -> Option<PathBuf> {
    let year_dir = root.join(format!("{:04}", year));
    match structure {
        GroupStructure::Flat => None,
        GroupStructure::Year => Some(year_dir),
        GroupStructure::YearMonth => Some(year_dir.join(format!("{:02}", month))),
    }
}

/// Group step.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupStep;

impl Step for GroupStep {
    fn name(&self) -> &'static str {
        "Group"
    }

    fn process(&self, ctx: &Context, mut items: Vec<FileItem>) -> Vec<FileItem> {
        let config = &ctx.config.group;
        if config.structure == GroupStructure::Flat {
            return items;
        }

        let mut registry = NameRegistry::new();
        let mut grouped = 0;
        for item in items.iter_mut().filter(|item| !item.is_marked_delete()) {
            let Some((year, month)) = item_year_month(item, config.prioritize_filename) else {
                debug!(path = %item.current_path.display(), "no date found; left in place");
                continue;
            };
            let Some(folder) = group_folder(&ctx.source_root, config.structure, year, month)
            else {
                continue;
            };

            let name = item.name();
            if item.current_path.parent() == Some(folder.as_path()) {
                registry.claim(&folder, &name);
                continue;
            }

            let (stem, ext) = split_name(&name);
            let target = registry.claim_unique(
                &folder,
                stem,
                ext,
                &[&item.original_path, &item.current_path],
            );
            if target.file_name() == item.current_path.file_name() {
                item.mark_move(&folder);
            } else {
                item.mark_relocate(target);
            }
            grouped += 1;
        }

        info!(grouped, "grouping planned");
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::item::Action;
    use crate::timestamp::local_epoch_seconds;
    use chrono::NaiveDate;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    fn context(root: &Path, config: PipelineConfig) -> Context {
        Context::new(root, None, config, true).expect("valid context")
    }

    fn write(path: PathBuf) -> FileItem {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        fs::write(&path, "content").expect("Failed to write");
        FileItem::new(path)
    }

    #[test]
    fn test_filename_year_month() {
        assert_eq!(filename_year_month("2024-3-05_beach"), Some((2024, 3)));
        assert_eq!(filename_year_month("2024-13-05"), None);
        assert_eq!(filename_year_month("beach_2024-03-05"), None);
    }

    #[test]
    fn test_filename_date_groups_by_year_month() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let items = vec![write(root.join("in").join("2024-03-05_14-00-00.jpg"))];

        let out = GroupStep.process(&context(root, PipelineConfig::default()), items);
        assert_eq!(out[0].action, Action::Move);
        assert_eq!(
            out[0].current_path,
            root.join("2024").join("03").join("2024-03-05_14-00-00.jpg")
        );
    }

    #[test]
    fn test_filesystem_time_when_filename_not_prioritized() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let item = write(root.join("2024-03-05 scan.txt"));
        let old = NaiveDate::from_ymd_opt(1993, 7, 12)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let time = FileTime::from_unix_time(local_epoch_seconds(&old), 0);
        filetime::set_file_mtime(&item.original_path, time).expect("Failed to set mtime");

        let mut config = PipelineConfig::default();
        config.group.prioritize_filename = false;
        let out = GroupStep.process(&context(root, config), vec![item]);
        assert_eq!(
            out[0].destination_path.as_deref(),
            Some(root.join("1993").join("07").join("2024-03-05 scan.txt").as_path())
        );
    }

    #[test]
    fn test_year_structure_and_collisions() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let items = vec![
            write(root.join("a").join("2020-01-01.txt")),
            write(root.join("b").join("2020-01-01.txt")),
        ];

        let mut config = PipelineConfig::default();
        config.group.structure = GroupStructure::Year;
        let out = GroupStep.process(&context(root, config), items);
        assert_eq!(out[0].current_path, root.join("2020").join("2020-01-01.txt"));
        assert_eq!(out[1].current_path, root.join("2020").join("2020-01-01_1.txt"));
    }

    #[test]
    fn test_flat_and_already_grouped_pass_through() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let items = vec![write(root.join("2021").join("06").join("2021-06-01.txt"))];

        let out = GroupStep.process(&context(root, PipelineConfig::default()), items.clone());
        assert_eq!(out[0].action, Action::None);

        let mut config = PipelineConfig::default();
        config.group.structure = GroupStructure::Flat;
        let loose = vec![write(root.join("2022-02-02.txt"))];
        let out = GroupStep.process(&context(root, config), loose);
        assert_eq!(out[0].action, Action::None);
    }
}
