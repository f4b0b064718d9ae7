//! phototidy - Deduplicate, rename, date and file away photo libraries
//!
//! A run scans a directory into a list of [`FileItem`]s, lets a sequence of
//! planning steps attach at most one pending action to each item, executes
//! those actions, and records every executed change in a SQLite undo log so
//! the whole run can be reverted later.

pub mod cli;
pub mod config;
pub mod executor;
pub mod file_category;
pub mod hashing;
pub mod item;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod scanner;
pub mod steps;
pub mod timestamp;
pub mod undo;

pub use config::{ConfigError, PipelineConfig};
pub use executor::{ExecutionReport, OrganizeError, execute};
pub use file_category::ScanCategory;
pub use item::{Action, Context, FileItem};
pub use pipeline::{Pipeline, RunMode, RunReport, UndoGrouping};
pub use scanner::{Scanner, scan, scan_count};
pub use steps::{PipelineStep, Step, StepKind};
pub use timestamp::{TimestampFormatter, TimestampPreset};
pub use undo::{ChangeRecord, UndoError, UndoReport, UndoStore};

pub use cli::{Cli, run_cli};
