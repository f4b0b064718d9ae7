//! Prefix, body and extension normalization in a single pass.
//!
//! Each item's name is rebuilt in three stages: an optional timestamp prefix,
//! an optional body rewrite and an extension cleanup. One [`NameRegistry`]
//! spans the whole call, so the final names are unique across the batch and
//! against files already on disk.

use super::Step;
use crate::config::{ExtensionConfig, RenameConfig, TimelineMode};
use crate::file_category::sniff_extension;
use crate::item::{Context, FileItem};
use crate::naming::{NameRegistry, SEPARATOR, make_safe_filename, split_name};
use crate::timestamp::{
    TimestampFormatter, exif_datetime, has_timestamp_prefix, is_timestamp_stem, modified_time,
    parse_filename_date,
};
use chrono::{Local, NaiveDateTime};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Leading segments treated as a prefix rather than part of the body:
/// dates (optionally with a time), counters like `(3)`, `[3]`, `3.`, and
/// short numeric runs like `0001_`.
static PREFIX_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(
            r"^\d{4}[-./]\d{1,2}[-./]\d{1,2}(?:[_ .-]\d{1,2}[-:]\d{2}[-:]\d{2}(?:[AP]M)?)?(?:_\d{6})?_?",
        )
        .expect("valid date prefix regex"),
        Regex::new(r"^(\(\d+\)|\[\d+\]|\d+\.)[-_ .]?").expect("valid counter prefix regex"),
        Regex::new(r"^\d{1,6}[_-]").expect("valid numeric prefix regex"),
    ]
});

const MULTIPART_EXTENSIONS: [&str; 3] = [".tar.gz", ".tar.bz2", ".tar.xz"];

const FALLBACK_BODY: &str = "file";

/// Canonical extension for a lower-cased extension, where one is defined.
fn uniform_extension(ext: &str) -> Option<&'static str> {
    let mapped = match ext {
        ".jpeg" | ".jpg" | ".png" | ".heic" | ".heif" | ".webp" | ".bmp" | ".raw" => ".jpg",
        ".tiff" | ".tif" => ".tif",
        ".mov" | ".avi" | ".mkv" | ".wmv" | ".flv" | ".mp4" => ".mp4",
        ".yaml" | ".yml" => ".yml",
        ".htm" | ".html" => ".html",
        ".text" | ".txt" => ".txt",
        ".doc" | ".docx" => ".docx",
        ".xls" | ".xlsx" => ".xlsx",
        ".ppt" | ".pptx" => ".pptx",
        _ => return None,
    };
    Some(mapped)
}

/// Like [`split_name`], but keeps `.tar.gz`-style extensions whole.
fn split_extension(name: &str) -> (String, String) {
    let lower = name.to_ascii_lowercase();
    for multipart in MULTIPART_EXTENSIONS {
        if lower.len() > multipart.len() && lower.ends_with(multipart) {
            let (stem, ext) = name.split_at(name.len() - multipart.len());
            return (stem.to_string(), ext.to_string());
        }
    }
    let (stem, ext) = split_name(name);
    (stem.to_string(), ext.to_string())
}

/// Splits a recognized leading prefix off a stem.
fn split_prefix_body(stem: &str) -> (&str, &str) {
    for pattern in PREFIX_PATTERNS.iter() {
        if let Some(found) = pattern.find(stem) {
            return stem.split_at(found.end());
        }
    }
    ("", stem)
}

/// Rewrites the body of `stem` per `[rename]`, keeping any leading prefix.
fn apply_body(stem: &str, rename: &RenameConfig) -> String {
    let (prefix, original_body) = split_prefix_body(stem);

    let replacement = rename.replace_bodyname.trim();
    let mut body = if replacement.is_empty() {
        original_body.to_string()
    } else {
        replacement.to_string()
    };

    let tail: Vec<&str> = [
        rename.append_first_text.as_str(),
        rename.append_second_text.as_str(),
    ]
    .into_iter()
    .filter(|t| !t.is_empty())
    .collect();
    if !tail.is_empty() {
        let tail = tail.join(SEPARATOR);
        let already_appended =
            body == tail || body.ends_with(&format!("{}{}", SEPARATOR, tail));
        if !already_appended {
            body = if body.is_empty() {
                tail
            } else {
                format!("{}{}{}", body, SEPARATOR, tail)
            };
        }
    }

    const JOINERS: [char; 4] = ['_', '-', '.', ' '];
    match (prefix.is_empty(), body.is_empty()) {
        (false, false) => {
            let joiner = if prefix.ends_with(JOINERS) { "" } else { SEPARATOR };
            format!("{}{}{}", prefix, joiner, body)
        }
        (false, true) => prefix.trim_end_matches(JOINERS).to_string(),
        (true, false) => body,
        (true, true) => FALLBACK_BODY.to_string(),
    }
}

fn rename_configured(rename: &RenameConfig) -> bool {
    !rename.replace_bodyname.trim().is_empty()
        || !rename.append_first_text.is_empty()
        || !rename.append_second_text.is_empty()
}

/// Normalizes `ext` in place, possibly shortening `stem` when it repeats the
/// extension (`a.jpg.jpg`).
fn apply_extension(stem: &mut String, ext: &mut String, original: &Path, config: &ExtensionConfig) {
    if ext.is_empty()
        && let Some(sniffed) = sniff_extension(original)
    {
        *ext = format!(".{}", sniffed);
    }
    if ext.is_empty() {
        return;
    }

    if config.clean_extensions {
        *ext = ext.to_lowercase();
        while stem.len() > ext.len() {
            let cut = stem.len() - ext.len();
            if !stem.is_char_boundary(cut) || !stem[cut..].eq_ignore_ascii_case(ext) {
                break;
            }
            stem.truncate(cut);
        }
    }

    if config.uniform_extensions
        && let Some(mapped) = uniform_extension(&ext.to_lowercase())
    {
        *ext = mapped.to_string();
    }
}

/// Capture time used for a timestamp prefix.
fn prefix_datetime(item: &FileItem) -> NaiveDateTime {
    exif_datetime(&item.original_path)
        .or_else(|| parse_filename_date(&item.name()))
        .or_else(|| modified_time(&item.original_path))
        .unwrap_or_else(|| Local::now().naive_local())
}

/// Filename step.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameStep;

impl FilenameStep {
    /// Computes the new stem and extension for one item.
    fn plan_name(&self, ctx: &Context, formatter: &TimestampFormatter, item: &FileItem) -> (String, String) {
        let config = &ctx.config;
        let (mut stem, mut ext) = split_extension(&item.name());

        match config.prefix.effective_mode() {
            TimelineMode::Off => {}
            TimelineMode::TimelinePlus => {
                if !has_timestamp_prefix(&stem) {
                    let stamp = formatter.format(&prefix_datetime(item));
                    stem = format!("{}{}{}", stamp, SEPARATOR, stem);
                }
            }
            TimelineMode::TimelineOnly => {
                if !is_timestamp_stem(&stem) {
                    stem = formatter.format(&prefix_datetime(item));
                }
            }
        }

        if rename_configured(&config.rename) {
            stem = apply_body(&stem, &config.rename);
        }

        apply_extension(&mut stem, &mut ext, &item.original_path, &config.extension);

        let mut stem = make_safe_filename(&stem);
        if stem.is_empty() {
            stem = FALLBACK_BODY.to_string();
        }
        (stem, make_safe_filename(&ext))
    }
}

impl Step for FilenameStep {
    fn name(&self) -> &'static str {
        "Filename"
    }

    fn process(&self, ctx: &Context, mut items: Vec<FileItem>) -> Vec<FileItem> {
        let formatter = TimestampFormatter::from_config(&ctx.config.timestamp_format);
        let mut registry = NameRegistry::new();
        let mut renamed = 0;

        for item in items.iter_mut().filter(|item| !item.is_marked_delete()) {
            let current_name = item.name();
            let (stem, ext) = self.plan_name(ctx, &formatter, item);

            let dir = item
                .current_path
                .parent()
                .unwrap_or(Path::new(""))
                .to_path_buf();
            let target = registry.claim_unique(
                &dir,
                &stem,
                &ext,
                &[&item.original_path, &item.current_path],
            );
            let new_name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if new_name != current_name {
                debug!(from = %current_name, to = %new_name, "rename planned");
                item.mark_rename(&new_name);
                renamed += 1;
            }
        }

        info!(renamed, "file names normalized");
        items
    }
}
