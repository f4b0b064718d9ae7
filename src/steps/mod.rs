//! The planning steps.
//!
//! A step receives the full item list and returns it with actions attached.
//! `process` is pure planning: it may read the filesystem (stat, hash, EXIF)
//! but never mutates it. Disk effects are realized by the executor, after
//! which `cleanup` gets a chance to tidy up (real runs only).
//!
//! The set of steps is closed, so they are modelled as the [`PipelineStep`]
//! enum rather than boxed trait objects.

pub mod deduplicate;
pub mod filename;
pub mod group;
pub mod standardize;
pub mod transfer;

pub use deduplicate::DeduplicateStep;
pub use filename::FilenameStep;
pub use group::GroupStep;
pub use standardize::StandardizeStep;
pub use transfer::TransferStep;

use crate::item::{Context, FileItem};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Contract shared by every planning step.
pub trait Step {
    /// Human-readable step name used in reports and logs.
    fn name(&self) -> &'static str;

    /// Plans actions for `items`. Never touches the disk.
    fn process(&self, ctx: &Context, items: Vec<FileItem>) -> Vec<FileItem>;

    /// Post-execution housekeeping. Never called during a dry run.
    fn cleanup(&self, _ctx: &Context, _items: &[FileItem]) {}
}

/// Identifier of a step, as used on the command line and in operation ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Deduplicate,
    Filename,
    Standardize,
    Group,
    Transfer,
}

impl StepKind {
    /// Order used when a full run does not name its steps.
    pub const DEFAULT_ORDER: [StepKind; 5] = [
        StepKind::Standardize,
        StepKind::Deduplicate,
        StepKind::Filename,
        StepKind::Group,
        StepKind::Transfer,
    ];

    /// Stable lower-case identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use phototidy::steps::StepKind;
    ///
    /// assert_eq!(StepKind::Deduplicate.id(), "deduplicate");
    /// assert_eq!("group".parse::<StepKind>(), Ok(StepKind::Group));
    /// ```
    pub fn id(&self) -> &'static str {
        match self {
            StepKind::Deduplicate => "deduplicate",
            StepKind::Filename => "filename",
            StepKind::Standardize => "standardize",
            StepKind::Group => "group",
            StepKind::Transfer => "transfer",
        }
    }

    /// Instantiates the step.
    pub fn build(&self) -> PipelineStep {
        match self {
            StepKind::Deduplicate => PipelineStep::Deduplicate(DeduplicateStep::new()),
            StepKind::Filename => PipelineStep::Filename(FilenameStep),
            StepKind::Standardize => PipelineStep::Standardize(StandardizeStep),
            StepKind::Group => PipelineStep::Group(GroupStep),
            StepKind::Transfer => PipelineStep::Transfer(TransferStep),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deduplicate" => Ok(StepKind::Deduplicate),
            "filename" => Ok(StepKind::Filename),
            "standardize" => Ok(StepKind::Standardize),
            "group" => Ok(StepKind::Group),
            "transfer" => Ok(StepKind::Transfer),
            other => Err(format!("unknown step '{}'", other)),
        }
    }
}

/// One of the five concrete steps.
pub enum PipelineStep {
    Deduplicate(DeduplicateStep),
    Filename(FilenameStep),
    Standardize(StandardizeStep),
    Group(GroupStep),
    Transfer(TransferStep),
}

impl PipelineStep {
    pub fn kind(&self) -> StepKind {
        match self {
            PipelineStep::Deduplicate(_) => StepKind::Deduplicate,
            PipelineStep::Filename(_) => StepKind::Filename,
            PipelineStep::Standardize(_) => StepKind::Standardize,
            PipelineStep::Group(_) => StepKind::Group,
            PipelineStep::Transfer(_) => StepKind::Transfer,
        }
    }

    fn inner(&self) -> &dyn Step {
        match self {
            PipelineStep::Deduplicate(step) => step,
            PipelineStep::Filename(step) => step,
            PipelineStep::Standardize(step) => step,
            PipelineStep::Group(step) => step,
            PipelineStep::Transfer(step) => step,
        }
    }
}

impl Step for PipelineStep {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn process(&self, ctx: &Context, items: Vec<FileItem>) -> Vec<FileItem> {
        self.inner().process(ctx, items)
    }

    fn cleanup(&self, ctx: &Context, items: &[FileItem]) {
        self.inner().cleanup(ctx, items)
    }
}

impl From<StepKind> for PipelineStep {
    fn from(kind: StepKind) -> Self {
        kind.build()
    }
}
