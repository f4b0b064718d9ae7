//! Removes byte-identical copies that sit next to each other.
//!
//! Candidates are grouped by `(folder, base name, extension)` after stripping
//! the markers that copy tools leave behind (`photo (1).jpg`,
//! `Copy of photo.jpg`). Only members whose full content hash matches are
//! treated as duplicates; a shared name alone never deletes anything.

use super::Step;
use crate::config::DedupMode;
use crate::hashing::{CHUNK_SIZE, HashCache, HashDepth};
use crate::item::{Context, FileItem};
use crate::naming::{NameRegistry, split_name};
use crate::timestamp::{exif_datetime, local_epoch_seconds};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

static NUMBERED_COPY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*) \((\d+)\)(\.[^.]+)$").expect("valid numbered-copy regex"));

static COPY_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Copy of (.*)(\.[^.]+)$").expect("valid copy-of regex"));

/// Extensions whose copies are preferred as the survivor.
const PREFERRED_FORMATS: [&str; 4] = [".raw", ".dng", ".tif", ".tiff"];
const FORMAT_BONUS: i64 = 10_000;
const CANONICAL_NAME_BONUS: i64 = 1_000;
const MARKED_NAME_PENALTY: i64 = 1;

/// A file name with any duplicate marker removed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CanonicalName {
    base: String,
    ext: String,
    marked: bool,
}

impl CanonicalName {
    fn parse(name: &str) -> Self {
        if let Some(caps) = NUMBERED_COPY.captures(name) {
            return Self {
                base: caps[1].to_string(),
                ext: caps[3].to_string(),
                marked: true,
            };
        }
        if let Some(caps) = COPY_OF.captures(name) {
            return Self {
                base: caps[1].to_string(),
                ext: caps[2].to_string(),
                marked: true,
            };
        }
        let (base, ext) = split_name(name);
        Self {
            base: base.to_string(),
            ext: ext.to_string(),
            marked: false,
        }
    }

    fn file_name(&self, suffix_text: &str) -> String {
        if suffix_text.is_empty() {
            format!("{}{}", self.base, self.ext)
        } else {
            format!("{}_{}{}", self.base, suffix_text, self.ext)
        }
    }
}

/// Deduplicate step. Owns the hash cache so repeated passes within one run
/// never re-read unchanged files.
#[derive(Clone, Default)]
pub struct DeduplicateStep {
    cache: HashCache,
}

impl DeduplicateStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `members` into sets of byte-identical files with two or more
    /// entries each.
    fn clusters(&self, items: &[FileItem], members: &[usize], faster: bool) -> Vec<Vec<usize>> {
        let mut clusters = Vec::new();
        let by_size = bucket_by(members, |i| {
            fs::metadata(&items[i].original_path).map(|m| m.len())
        });

        for (size, same_size) in by_size {
            if same_size.len() < 2 {
                continue;
            }
            // A prefix hash of a file no longer than one chunk is its full hash.
            let candidates: Vec<Vec<usize>> = if faster && size > CHUNK_SIZE as u64 {
                bucket_by(&same_size, |i| {
                    self.cache.hash(&items[i].original_path, HashDepth::Prefix)
                })
                .into_iter()
                .map(|(_, bucket)| bucket)
                .filter(|bucket| bucket.len() > 1)
                .collect()
            } else {
                vec![same_size]
            };

            for candidate in candidates {
                let by_hash = bucket_by(&candidate, |i| {
                    self.cache.hash(&items[i].original_path, HashDepth::Full)
                });
                clusters.extend(
                    by_hash
                        .into_iter()
                        .map(|(_, cluster)| cluster)
                        .filter(|cluster| cluster.len() > 1),
                );
            }
        }
        clusters
    }
}

/// Groups indices by a fallible key, keeping first-seen order for both the
/// groups and their members. Indices whose key cannot be computed are dropped.
fn bucket_by<K, F>(indices: &[usize], mut key: F) -> Vec<(K, Vec<usize>)>
where
    K: Eq + Hash + Clone,
    F: FnMut(usize) -> io::Result<K>,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut buckets: Vec<(K, Vec<usize>)> = Vec::new();
    for &index in indices {
        match key(index) {
            Ok(k) => match positions.get(&k) {
                Some(&pos) => buckets[pos].1.push(index),
                None => {
                    positions.insert(k.clone(), buckets.len());
                    buckets.push((k, vec![index]));
                }
            },
            Err(e) => warn!(error = %e, "cannot inspect duplicate candidate; leaving it alone"),
        }
    }
    buckets
}

/// Survivor score: capture time, size, format and name hints, higher wins.
fn score(item: &FileItem, name: &CanonicalName) -> i64 {
    let path = &item.original_path;
    let metadata = fs::metadata(path).ok();

    let captured = exif_datetime(path)
        .map(|dt| local_epoch_seconds(&dt))
        .or_else(|| {
            let modified = metadata.as_ref()?.modified().ok()?;
            let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
            i64::try_from(secs).ok()
        })
        .unwrap_or(0);
    let size = metadata
        .as_ref()
        .and_then(|m| i64::try_from(m.len()).ok())
        .unwrap_or(0);

    let ext = name.ext.to_lowercase();
    let format_bonus = if PREFERRED_FORMATS.contains(&ext.as_str()) {
        FORMAT_BONUS
    } else {
        0
    };

    let name_hint = if name.marked {
        -MARKED_NAME_PENALTY
    } else if item.name() == name.file_name("") {
        CANONICAL_NAME_BONUS
    } else {
        0
    };

    captured + size + format_bonus + name_hint
}

impl Step for DeduplicateStep {
    fn name(&self) -> &'static str {
        "Deduplicate"
    }

    fn process(&self, ctx: &Context, mut items: Vec<FileItem>) -> Vec<FileItem> {
        let config = &ctx.config.deduplicate;
        let names: Vec<CanonicalName> = items
            .iter()
            .map(|item| CanonicalName::parse(&item.name()))
            .collect();

        let mut group_index: HashMap<(PathBuf, String, String), usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if item.is_marked_delete() {
                continue;
            }
            let parent = item
                .current_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let key = (parent, names[index].base.clone(), names[index].ext.clone());
            match group_index.get(&key) {
                Some(&pos) => groups[pos].push(index),
                None => {
                    group_index.insert(key, groups.len());
                    groups.push(vec![index]);
                }
            }
        }

        let mut registry = NameRegistry::new();
        let mut removed = 0;
        for members in groups.iter().filter(|g| g.len() > 1) {
            let marked = members.iter().any(|&i| names[i].marked);
            if !marked && config.mode != DedupMode::Verify {
                continue;
            }

            for cluster in self.clusters(&items, members, config.faster_process) {
                let mut ranked: Vec<(i64, usize)> = cluster
                    .iter()
                    .map(|&i| (score(&items[i], &names[i]), i))
                    .collect();
                // Stable: equal scores keep first-seen order.
                ranked.sort_by(|a, b| b.0.cmp(&a.0));

                let winner = ranked[0].1;
                for &(_, loser) in &ranked[1..] {
                    debug!(path = %items[loser].original_path.display(), "duplicate marked for removal");
                    items[loser].mark_delete();
                    removed += 1;
                }

                let canonical = names[winner].file_name(&config.suffix_text);
                if items[winner].name() == canonical {
                    registry.claim(
                        items[winner].current_path.parent().unwrap_or(Path::new("")),
                        &canonical,
                    );
                    continue;
                }
                let target = items[winner].current_path.with_file_name(&canonical);
                let dir = target.parent().unwrap_or(Path::new("")).to_path_buf();
                let occupied_by_outsider = target.exists()
                    && !cluster.iter().any(|&i| {
                        items[i].original_path == target || items[i].current_path == target
                    });
                if registry.is_claimed(&dir, &canonical) || occupied_by_outsider {
                    debug!(
                        path = %items[winner].current_path.display(),
                        canonical = %canonical,
                        "canonical name taken; keeping current name"
                    );
                    continue;
                }
                registry.claim(&dir, &canonical);
                items[winner].mark_rename(&canonical);
            }
        }

        if removed > 0 {
            info!(duplicates = removed, "duplicates planned for removal");
        }
        items
    }
}
