//! File name arithmetic shared by the planning steps.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Separator placed between name segments and before collision counters.
pub const SEPARATOR: &str = "_";

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\n\r\t]"#).expect("valid unsafe-char regex"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Splits a file name into stem and extension (with its dot).
///
/// The extension starts at the last `.` that is neither the first nor the
/// last character, so dot-files and trailing dots have no extension.
///
/// # Examples
///
/// ```
/// use phototidy::naming::split_name;
///
/// assert_eq!(split_name("photo.JPG"), ("photo", ".JPG"));
/// assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
/// assert_eq!(split_name(".profile"), (".profile", ""));
/// assert_eq!(split_name("README"), ("README", ""));
/// ```
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Replaces characters that are unsafe on common filesystems and collapses
/// whitespace runs.
pub fn make_safe_filename(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    WHITESPACE_RUN.replace_all(&replaced, " ").trim().to_string()
}

/// `stem_n.ext`
pub fn counter_name(stem: &str, ext: &str, counter: usize) -> String {
    format!("{}{}{}{}", stem, SEPARATOR, counter, ext)
}

/// Batch-scoped record of destination names already handed out.
///
/// Names are compared per directory and case-insensitively, so two items
/// never resolve to paths that would clash on a case-insensitive volume.
#[derive(Debug, Default)]
pub struct NameRegistry {
    claimed: HashSet<(PathBuf, String)>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(dir: &Path, name: &str) -> (PathBuf, String) {
        (dir.to_path_buf(), name.to_lowercase())
    }

    pub fn is_claimed(&self, dir: &Path, name: &str) -> bool {
        self.claimed.contains(&Self::key(dir, name))
    }

    pub fn claim(&mut self, dir: &Path, name: &str) {
        self.claimed.insert(Self::key(dir, name));
    }

    /// Claims `dir/stem+ext`, or the first free `dir/stem_n+ext`.
    ///
    /// A candidate is taken when it was already claimed in this batch or
    /// exists on disk and is not one of `owned` (the item's own on-disk and
    /// planned paths).
    pub fn claim_unique(&mut self, dir: &Path, stem: &str, ext: &str, owned: &[&Path]) -> PathBuf {
        let mut name = format!("{}{}", stem, ext);
        let mut counter = 1;
        while self.is_taken(dir, &name, owned) {
            name = counter_name(stem, ext, counter);
            counter += 1;
        }
        self.claim(dir, &name);
        dir.join(name)
    }

    fn is_taken(&self, dir: &Path, name: &str, owned: &[&Path]) -> bool {
        if self.is_claimed(dir, name) {
            return true;
        }
        let candidate = dir.join(name);
        !owned.contains(&candidate.as_path()) && candidate.exists()
    }
}
