/// Extension classes used to select which files a scan picks up.
///
/// Matching is by lower-cased extension against a fixed taxonomy. `All`
/// accepts every file and `Others` accepts files that belong to none of the
/// named classes.
///
/// # Examples
///
/// ```
/// use phototidy::file_category::ScanCategory;
/// use std::path::Path;
///
/// assert!(ScanCategory::Photos.matches(Path::new("IMG_0001.HEIC")));
/// assert!(!ScanCategory::Photos.matches(Path::new("clip.mov")));
/// assert!(ScanCategory::Others.matches(Path::new("archive.zip")));
/// assert!(ScanCategory::All.matches(Path::new("anything")));
/// ```
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// A named extension class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ScanCategory {
    /// Every file.
    #[default]
    All,
    /// Still images.
    Photos,
    /// Video clips.
    Video,
    /// Audio tracks.
    Audio,
    /// Documents, spreadsheets and presentations.
    Docs,
    /// Source code and markup.
    Code,
    /// Files outside every named class.
    Others,
}

impl ScanCategory {
    /// The five classes backed by an extension list.
    pub const NAMED: [ScanCategory; 5] = [
        ScanCategory::Photos,
        ScanCategory::Video,
        ScanCategory::Audio,
        ScanCategory::Docs,
        ScanCategory::Code,
    ];

    /// Returns the configuration name of this category.
    pub fn name(&self) -> &'static str {
        match self {
            ScanCategory::All => "all",
            ScanCategory::Photos => "photos",
            ScanCategory::Video => "video",
            ScanCategory::Audio => "audio",
            ScanCategory::Docs => "docs",
            ScanCategory::Code => "code",
            ScanCategory::Others => "others",
        }
    }

    /// Returns a human-readable description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            ScanCategory::All => "All files",
            ScanCategory::Photos => "Photo files",
            ScanCategory::Video => "Video files",
            ScanCategory::Audio => "Audio files",
            ScanCategory::Docs => "Document files",
            ScanCategory::Code => "Source code files",
            ScanCategory::Others => "Uncategorized files",
        }
    }

    /// Whether a file at `path` belongs to this category.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        self.matches_extension(ext.as_deref())
    }

    /// Whether a (lower-cased, dot-less) extension belongs to this category.
    pub fn matches_extension(&self, ext: Option<&str>) -> bool {
        let named = ext.and_then(|e| EXTENSION_MAPPER.extension_to_category(e));
        match self {
            ScanCategory::All => true,
            ScanCategory::Others => named.is_none(),
            category => named == Some(*category),
        }
    }
}

static EXTENSION_MAPPER: LazyLock<ExtensionMapper> = LazyLock::new(ExtensionMapper::new);

/// Maps file extensions to named scan categories.
#[derive(Debug, Clone)]
pub struct ExtensionMapper {
    extension_map: HashMap<String, ScanCategory>,
}

impl ExtensionMapper {
    /// Creates a new `ExtensionMapper` with the standard taxonomy.
    pub fn new() -> Self {
        let mut mapper = Self {
            extension_map: HashMap::new(),
        };
        mapper.populate_standard_mappings();
        mapper
    }

    fn populate_standard_mappings(&mut self) {
        let table: [(ScanCategory, &[&str]); 5] = [
            (
                ScanCategory::Photos,
                &["jpg", "jpeg", "png", "heic", "gif", "webp", "tiff", "bmp", "raw", "svg"],
            ),
            (
                ScanCategory::Video,
                &["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv"],
            ),
            (ScanCategory::Audio, &["mp3", "wav", "flac", "aac", "ogg", "m4a"]),
            (
                ScanCategory::Docs,
                &[
                    "pdf", "doc", "docx", "txt", "rtf", "xls", "xlsx", "ppt", "pptx", "csv", "md",
                ],
            ),
            (
                ScanCategory::Code,
                &[
                    "py", "ts", "tsx", "js", "jsx", "html", "css", "json", "yaml", "yml", "sh",
                    "sql", "c", "cpp", "h", "java", "go", "rs", "php",
                ],
            ),
        ];

        for (category, extensions) in table {
            for ext in extensions {
                self.add_extension_mapping(ext, category);
            }
        }
    }

    /// Adds a file extension to category mapping.
    pub fn add_extension_mapping(&mut self, ext: &str, category: ScanCategory) {
        self.extension_map.insert(ext.to_lowercase(), category);
    }

    /// Maps a file extension to a named category.
    pub fn extension_to_category(&self, ext: &str) -> Option<ScanCategory> {
        self.extension_map.get(&ext.to_lowercase()).copied()
    }
}

impl Default for ExtensionMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Detects a file's extension from its content.
///
/// Uses the `infer` crate's magic-number table, so only the first bytes of
/// the file are read. Returns `None` for unreadable or unrecognized files.
pub fn sniff_extension(path: &Path) -> Option<&'static str> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => Some(kind.extension()),
        _ => None,
    }
}
