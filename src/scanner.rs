//! Directory traversal producing the initial item list.
//!
//! The walk is depth-first, sorted by file name so repeated scans of the same
//! tree yield the same order, and never follows symlinks. Hidden files and
//! directories below the root are skipped. The scan is read-only.

use crate::config::{ConfigError, ScanConfig};
use crate::file_category::ScanCategory;
use crate::item::FileItem;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Safety cap applied to every scan regardless of the caller's limit.
pub const HARD_LIMIT: usize = 50_000;

/// Scans `root` for files in `category`.
///
/// A missing root yields an empty list.
pub fn scan(root: &Path, category: ScanCategory, limit: Option<usize>) -> Vec<FileItem> {
    Scanner::new(category).with_limit(limit).scan(root)
}

/// Counts the files a [`scan`] would return, and whether more exist.
///
/// # Examples
///
/// ```no_run
/// use phototidy::file_category::ScanCategory;
/// use phototidy::scanner::scan_count;
/// use std::path::Path;
///
/// let (count, truncated) = scan_count(Path::new("/photos"), ScanCategory::All, Some(3));
/// println!("{} files{}", count, if truncated { " (more available)" } else { "" });
/// ```
pub fn scan_count(root: &Path, category: ScanCategory, limit: Option<usize>) -> (usize, bool) {
    Scanner::new(category).with_limit(limit).scan_count(root)
}

/// A configured scan.
#[derive(Debug, Clone)]
pub struct Scanner {
    category: ScanCategory,
    limit: Option<usize>,
    hard_limit: usize,
    exclude: Vec<Pattern>,
}

impl Scanner {
    pub fn new(category: ScanCategory) -> Self {
        Self {
            category,
            limit: None,
            hard_limit: HARD_LIMIT,
            exclude: Vec::new(),
        }
    }

    /// Builds a scanner from the `[scan]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidGlobPattern` if an exclude pattern is invalid.
    pub fn from_config(config: &ScanConfig) -> Result<Self, ConfigError> {
        let exclude = config.exclude_patterns()?;
        Ok(Self::new(config.category)
            .with_limit(config.limit)
            .with_excludes(exclude))
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Lowers or raises the safety cap that applies even without a limit.
    pub fn with_hard_limit(mut self, hard_limit: usize) -> Self {
        self.hard_limit = hard_limit;
        self
    }

    pub fn with_excludes(mut self, exclude: Vec<Pattern>) -> Self {
        self.exclude = exclude;
        self
    }

    fn cap(&self) -> usize {
        self.limit
            .map_or(self.hard_limit, |l| l.min(self.hard_limit))
    }

    /// Collects matching files under `root` as fresh items.
    pub fn scan(&self, root: &Path) -> Vec<FileItem> {
        if !root.exists() {
            info!(root = %root.display(), "scan root does not exist; nothing to do");
            return Vec::new();
        }

        let cap = self.cap();
        let mut files = self.matching_files(root);
        let items: Vec<FileItem> = files.by_ref().take(cap).map(FileItem::new).collect();
        if items.len() == cap && files.next().is_some() {
            warn!(limit = cap, "scan truncated");
        }

        info!(
            root = %root.display(),
            category = self.category.name(),
            count = items.len(),
            "scan complete"
        );
        items
    }

    /// Counts matching files, reporting truncation only when at least one
    /// further match exists beyond the cap.
    pub fn scan_count(&self, root: &Path) -> (usize, bool) {
        if !root.exists() {
            return (0, false);
        }

        let cap = self.cap();
        let mut files = self.matching_files(root);
        let count = files.by_ref().take(cap).count();
        let truncated = count == cap && files.next().is_some();
        (count, truncated)
    }

    fn matching_files<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(move |entry| self.category.matches(entry.path()))
            .filter(move |entry| !self.is_excluded(root, entry.path()))
            .map(DirEntry::into_path)
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.exclude
            .iter()
            .any(|pattern| pattern.matches_path(relative))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}
