//! Pipeline configuration.
//!
//! One typed schema covers every step. It is loaded from TOML and validated
//! before any scan happens, so a bad enumerated value never reaches the
//! planning code.
//!
//! # Configuration File Format
//!
//! Every section and every field is optional:
//!
//! ```toml
//! [scan]
//! category = "photos"
//! exclude = ["exports/**", "*.tmp"]
//!
//! [timestamp_format]
//! preset = "google_photos"
//!
//! [deduplicate]
//! mode = "verify"
//!
//! [prefix]
//! timeline_mode = "timeline_only"
//!
//! [group]
//! structure = "year"
//!
//! [undo]
//! max_history = 20
//! ```

use crate::file_category::ScanCategory;
use crate::timestamp::TimestampPreset;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".phototidy.toml";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax, structure or enumerated value.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern in `scan.exclude`.
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    /// A value that parses but is out of range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub scan: ScanConfig,
    pub timestamp_format: TimestampFormatConfig,
    pub standardize: StandardizeConfig,
    pub deduplicate: DeduplicateConfig,
    pub prefix: PrefixConfig,
    pub extension: ExtensionConfig,
    pub rename: RenameConfig,
    pub group: GroupConfig,
    pub transfer: TransferConfig,
    pub undo: UndoConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Extension class to scan.
    pub category: ScanCategory,
    /// Caller-supplied cap on the number of scanned files.
    pub limit: Option<usize>,
    /// Glob patterns, relative to the scan root, of files to leave alone.
    pub exclude: Vec<String>,
}

impl ScanConfig {
    /// Compile `exclude` into glob patterns.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidGlobPattern` for the first invalid pattern.
    pub fn exclude_patterns(&self) -> Result<Vec<Pattern>, ConfigError> {
        self.exclude
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampFormatConfig {
    pub preset: TimestampPreset,
    /// Overrides the preset's hour style when set.
    pub hour_format_12: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardizeConfig {
    /// Probe each file name when the folder name carries no timestamp.
    pub use_filename_fallback: bool,
}

/// How eagerly the deduplicate step hashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Hash only groups where a name carries a duplicate marker.
    #[default]
    Safe,
    /// Hash every group with more than one member.
    Verify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicateConfig {
    pub mode: DedupMode,
    /// Bucket by a prefix hash before hashing whole files.
    pub faster_process: bool,
    /// Appended to the canonical winner name as `base_<text>.ext`.
    pub suffix_text: String,
}

impl Default for DeduplicateConfig {
    fn default() -> Self {
        Self {
            mode: DedupMode::Safe,
            faster_process: true,
            suffix_text: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineMode {
    Off,
    /// The name becomes the timestamp.
    TimelineOnly,
    /// The timestamp is prepended to the name.
    TimelinePlus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixConfig {
    pub add_timestamp: bool,
    pub timeline_mode: Option<TimelineMode>,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            add_timestamp: true,
            timeline_mode: None,
        }
    }
}

impl PrefixConfig {
    /// The mode actually applied: an explicit `timeline_mode` wins, otherwise
    /// `add_timestamp` selects between `timeline_plus` and `off`.
    pub fn effective_mode(&self) -> TimelineMode {
        match self.timeline_mode {
            Some(mode) => mode,
            None if self.add_timestamp => TimelineMode::TimelinePlus,
            None => TimelineMode::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub clean_extensions: bool,
    pub uniform_extensions: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            clean_extensions: true,
            uniform_extensions: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameConfig {
    pub replace_bodyname: String,
    pub append_first_text: String,
    pub append_second_text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStructure {
    Year,
    #[default]
    YearMonth,
    /// Grouping disabled.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub prioritize_filename: bool,
    pub structure: GroupStructure,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            prioritize_filename: true,
            structure: GroupStructure::YearMonth,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub overwrite: bool,
    pub cleanup_hidden_files: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Database file; `<source_root>/.phototidy_undo.db` when unset.
    pub database: Option<PathBuf>,
    /// Operations kept before the oldest are evicted.
    pub max_history: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            database: None,
            max_history: 10,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.phototidy.toml` in the current directory
    /// 3. Look for `~/.config/phototidy/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but
    /// cannot be read, or if any file found is not valid.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("phototidy")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.undo.max_history == 0 {
            return Err(ConfigError::InvalidValue {
                field: "undo.max_history",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scan.limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "scan.limit",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        self.scan.exclude_patterns().map(|_| ())
    }
}
