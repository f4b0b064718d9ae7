//! Planning records shared by every pipeline step.
//!
//! A [`FileItem`] tracks one file through a run: where it really is on disk
//! (`original_path`), where the plan built so far would put it
//! (`current_path`), and the single pending disk effect ([`Action`]) that the
//! executor will realize. Steps only ever touch items through the `mark_*`
//! mutators, which are pure path arithmetic and never perform I/O.

use crate::config::{ConfigError, PipelineConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory under the source root that receives "deleted" files.
pub const TRASH_DIR_NAME: &str = ".undo_trash";

/// File name of the undo database when none is configured.
pub const UNDO_DB_FILE_NAME: &str = ".phototidy_undo.db";

/// Metadata key set by the executor when an item's action failed.
pub const META_EXECUTION_ERROR: &str = "execution_error";
/// Metadata key holding the timestamp Standardize derived for an item.
pub const META_STANDARDIZED_AT: &str = "standardized_at";
/// Metadata key holding the folder Standardize flattened an item out of.
pub const META_STANDARDIZED_FROM: &str = "standardized_from";
/// Metadata flag allowing the pending move to replace an existing file.
/// Only Transfer sets it, and only with `transfer.overwrite` enabled.
pub const META_REPLACE_EXISTING: &str = "replace_existing";

/// The pending disk effect planned for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Nothing to do.
    #[default]
    None,
    /// Move the file into the undo trash.
    Delete,
    /// Change the file name, same directory.
    Rename,
    /// Relocate the file, possibly under a new name.
    Move,
}

impl Action {
    /// Returns the persisted name of this action.
    ///
    /// # Examples
    ///
    /// ```
    /// use phototidy::item::Action;
    ///
    /// assert_eq!(Action::Delete.as_str(), "DELETE");
    /// assert_eq!(Action::Move.as_str(), "MOVE");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "NONE",
            Action::Delete => "DELETE",
            Action::Rename => "RENAME",
            Action::Move => "MOVE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Action::None),
            "DELETE" => Ok(Action::Delete),
            "RENAME" => Ok(Action::Rename),
            "MOVE" => Ok(Action::Move),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// One file under active planning.
///
/// Invariant: `destination_path` is `Some` iff `action` is not [`Action::None`],
/// except for [`Action::Delete`] between planning and execution, where the
/// trash path is only assigned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileItem {
    /// Where the file actually is on disk, as of the last executed step.
    pub original_path: PathBuf,
    /// Where the plan built so far would put the file.
    pub current_path: PathBuf,
    /// Pending disk effect.
    pub action: Action,
    /// Target of the pending effect.
    pub destination_path: Option<PathBuf>,
    /// Cross-step hints keyed by purpose.
    pub metadata: BTreeMap<String, Value>,
}

impl FileItem {
    /// Creates an item for a file that currently lives at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            original_path: path.clone(),
            current_path: path,
            action: Action::None,
            destination_path: None,
            metadata: BTreeMap::new(),
        }
    }

    /// File name of the speculative path.
    pub fn name(&self) -> String {
        self.current_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The location later steps should treat as this item's input.
    pub fn effective_path(&self) -> &Path {
        self.destination_path
            .as_deref()
            .unwrap_or(self.current_path.as_path())
    }

    pub fn is_marked_delete(&self) -> bool {
        self.action == Action::Delete
    }

    /// Plans a deletion. The trash path is assigned at execution time.
    pub fn mark_delete(&mut self) {
        self.metadata.remove(META_REPLACE_EXISTING);
        self.action = Action::Delete;
        self.destination_path = None;
    }

    /// Plans a rename within the item's current directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use phototidy::item::{Action, FileItem};
    /// use std::path::Path;
    ///
    /// let mut item = FileItem::new("/photos/IMG_0001.JPG");
    /// item.mark_rename("IMG_0001.jpg");
    /// assert_eq!(item.action, Action::Rename);
    /// assert_eq!(item.current_path, Path::new("/photos/IMG_0001.jpg"));
    /// assert_eq!(item.destination_path.as_deref(), Some(Path::new("/photos/IMG_0001.jpg")));
    /// ```
    pub fn mark_rename(&mut self, new_name: &str) {
        self.metadata.remove(META_REPLACE_EXISTING);
        self.action = Action::Rename;
        self.current_path = self.current_path.with_file_name(new_name);
        self.destination_path = Some(self.current_path.clone());
    }

    /// Plans a move into `new_folder`, keeping the current file name.
    pub fn mark_move(&mut self, new_folder: &Path) {
        let name = self.current_path.file_name().map(|n| n.to_os_string());
        self.metadata.remove(META_REPLACE_EXISTING);
        self.action = Action::Move;
        self.current_path = match name {
            Some(name) => new_folder.join(name),
            None => new_folder.to_path_buf(),
        };
        self.destination_path = Some(self.current_path.clone());
    }

    /// Plans a move to an explicit full path, used when both the folder and
    /// the name change in one step.
    pub fn mark_relocate(&mut self, destination: PathBuf) {
        self.metadata.remove(META_REPLACE_EXISTING);
        self.action = Action::Move;
        self.current_path = destination.clone();
        self.destination_path = Some(destination);
    }

    /// Like [`mark_relocate`](Self::mark_relocate), but the executor may
    /// replace a file already at `destination`.
    pub fn mark_relocate_replacing(&mut self, destination: PathBuf) {
        self.mark_relocate(destination);
        self.metadata
            .insert(META_REPLACE_EXISTING.to_string(), Value::Bool(true));
    }

    pub fn replaces_existing(&self) -> bool {
        self.action == Action::Move
            && self.metadata.get(META_REPLACE_EXISTING) == Some(&Value::Bool(true))
    }

    /// Points a pending rename or move at another path, keeping the action.
    /// The new path never replaces an existing file.
    pub fn redirect(&mut self, destination: PathBuf) {
        self.metadata.remove(META_REPLACE_EXISTING);
        self.current_path = destination.clone();
        self.destination_path = Some(destination);
    }

    /// Drops any pending effect. `current_path` is kept, so a dry run can
    /// chain one step's speculative result into the next.
    pub fn reset_action(&mut self) {
        self.metadata.remove(META_REPLACE_EXISTING);
        self.action = Action::None;
        self.destination_path = None;
    }

    /// Records that the file now lives at `path` on disk.
    pub fn settle_at(&mut self, path: PathBuf) {
        self.original_path = path.clone();
        self.current_path = path;
        self.reset_action();
    }

    /// Abandons the pending plan and points back at the on-disk file.
    pub fn roll_back(&mut self) {
        self.current_path = self.original_path.clone();
        self.reset_action();
    }
}

/// Immutable per-run settings shared by reference across all steps.
#[derive(Debug, Clone)]
pub struct Context {
    pub dry_run: bool,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub config: PipelineConfig,
}

impl Context {
    /// Builds a context after validating the configuration.
    ///
    /// `target_root` defaults to `source_root` when not given.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration fails validation.
    pub fn new(
        source_root: impl Into<PathBuf>,
        target_root: Option<PathBuf>,
        config: PipelineConfig,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let source_root = source_root.into();
        let target_root = target_root.unwrap_or_else(|| source_root.clone());
        Ok(Self {
            dry_run,
            source_root,
            target_root,
            config,
        })
    }

    /// Directory that receives trashed files.
    pub fn trash_dir(&self) -> PathBuf {
        self.source_root.join(TRASH_DIR_NAME)
    }

    /// Location of the undo database for this run.
    pub fn undo_database_path(&self) -> PathBuf {
        self.config
            .undo
            .database
            .clone()
            .unwrap_or_else(|| self.source_root.join(UNDO_DB_FILE_NAME))
    }
}
