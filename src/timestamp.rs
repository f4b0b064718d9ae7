//! Timestamp extraction, formatting and write-back.
//!
//! Every step that names or files things by date goes through this module so
//! they agree on one format. Capture times come from three places, tried in
//! an order each step decides: embedded EXIF data, a timestamp already present
//! in the file name, and filesystem times.
//!
//! EXIF is read and written through the external `exiftool` binary. Its
//! availability is probed once per process; when it is missing, EXIF lookups
//! return `None` and write-back only touches filesystem times.

use crate::config::TimestampFormatConfig;
use crate::file_category::ScanCategory;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use filetime::FileTime;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::{LazyLock, OnceLock};
use tracing::{debug, warn};

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Tags queried for a capture time, in priority order.
const EXIF_DATE_TAGS: [&str; 3] = ["DateTimeOriginal", "CreateDate", "ModifyDate"];

/// `YYYY-MM-DD[ _]H-MM-SS[AM|PM]` anywhere in a name.
static FILENAME_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{4})-(\d{2})-(\d{2})[ _](\d{1,2})-(\d{2})-(\d{2})\s?([AP]M)?")
        .expect("valid timestamp regex")
});

static FILENAME_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid date regex"));

/// A whole folder name in one of the recognized formats.
static FOLDER_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{4})-(\d{1,2})-(\d{1,2})([ _])(\d{1,2})-(\d{2})-(\d{2})([AP]M)?$")
        .expect("valid folder regex")
});

/// A name that starts with a timestamp produced by any preset.
static FORMATTED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d{4}-\d{2}-\d{2}[ _]\d{1,2}-\d{2}-\d{2}(?:[AP]M)?(?:_\d{6})?")
        .expect("valid prefix regex")
});

/// A stem that is nothing but a formatted timestamp, with an optional counter.
static FORMATTED_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d{4}-\d{2}-\d{2}[ _]\d{1,2}-\d{2}-\d{2}(?:[AP]M)?(?:_\d{6})?(?:_\d+)?$")
        .expect("valid stem regex")
});

/// Named timestamp styles matching common photo services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPreset {
    /// `2024-01-01 2-30-45PM_123456`
    #[default]
    Pcloud,
    /// `2024-01-01_14-30-45`
    GooglePhotos,
    /// `2024-01-01_02-30-45PM`
    Default,
}

/// Renders date-times in the configured file name style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampFormatter {
    datetime_separator: char,
    twelve_hour: bool,
    pad_hour: bool,
    microseconds: bool,
}

impl TimestampFormatter {
    /// Builds a formatter from a preset and an optional global hour override.
    ///
    /// A 12-hour override always drops hour padding and a 24-hour override
    /// always pads.
    pub fn new(preset: TimestampPreset, hour_format_12: Option<bool>) -> Self {
        let mut formatter = match preset {
            TimestampPreset::Pcloud => Self {
                datetime_separator: ' ',
                twelve_hour: true,
                pad_hour: false,
                microseconds: true,
            },
            TimestampPreset::GooglePhotos => Self {
                datetime_separator: '_',
                twelve_hour: false,
                pad_hour: true,
                microseconds: false,
            },
            TimestampPreset::Default => Self {
                datetime_separator: '_',
                twelve_hour: true,
                pad_hour: true,
                microseconds: false,
            },
        };

        if let Some(twelve_hour) = hour_format_12 {
            formatter.twelve_hour = twelve_hour;
            formatter.pad_hour = !twelve_hour;
        }
        formatter
    }

    pub fn from_config(config: &TimestampFormatConfig) -> Self {
        Self::new(config.preset, config.hour_format_12)
    }

    /// Formats a date-time.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use phototidy::timestamp::{TimestampFormatter, TimestampPreset};
    ///
    /// let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
    ///     .unwrap()
    ///     .and_hms_micro_opt(14, 30, 45, 123456)
    ///     .unwrap();
    /// let pcloud = TimestampFormatter::new(TimestampPreset::Pcloud, None);
    /// assert_eq!(pcloud.format(&dt), "2024-01-01 2-30-45PM_123456");
    /// let google = TimestampFormatter::new(TimestampPreset::GooglePhotos, None);
    /// assert_eq!(google.format(&dt), "2024-01-01_14-30-45");
    /// ```
    pub fn format(&self, dt: &NaiveDateTime) -> String {
        let date = dt.format("%Y-%m-%d");
        let time = if self.twelve_hour {
            let (is_pm, hour) = dt.hour12();
            let meridiem = if is_pm { "PM" } else { "AM" };
            if self.pad_hour {
                format!("{:02}-{}{}", hour, dt.format("%M-%S"), meridiem)
            } else {
                format!("{}-{}{}", hour, dt.format("%M-%S"), meridiem)
            }
        } else {
            dt.format("%H-%M-%S").to_string()
        };

        let mut out = format!("{}{}{}", date, self.datetime_separator, time);
        if self.microseconds {
            out.push_str(&format!("_{:06}", dt.nanosecond() / 1_000 % 1_000_000));
        }
        out
    }
}

fn capture_u32(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

fn build_datetime(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    meridiem: Option<&str>,
) -> Option<NaiveDateTime> {
    let hour = match meridiem.map(str::to_ascii_uppercase).as_deref() {
        Some("PM") if (1..=12).contains(&hour) => hour % 12 + 12,
        Some("AM") if (1..=12).contains(&hour) => hour % 12,
        Some(_) => return None,
        None => hour,
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(date.and_time(time))
}

fn datetime_from_captures(caps: &Captures<'_>, hour_index: usize) -> Option<NaiveDateTime> {
    build_datetime(
        caps.get(1)?.as_str().parse().ok()?,
        capture_u32(caps, 2)?,
        capture_u32(caps, 3)?,
        capture_u32(caps, hour_index)?,
        capture_u32(caps, hour_index + 1)?,
        capture_u32(caps, hour_index + 2)?,
        caps.get(hour_index + 3).map(|m| m.as_str()),
    )
}

/// Finds a full date-and-time stamp anywhere in a file name.
///
/// # Examples
///
/// ```
/// use phototidy::timestamp::parse_filename_timestamp;
///
/// let dt = parse_filename_timestamp("IMG 2001-11-15 12-10-00AM.jpg").unwrap();
/// assert_eq!(dt.to_string(), "2001-11-15 00:10:00");
/// assert!(parse_filename_timestamp("holiday.jpg").is_none());
/// ```
pub fn parse_filename_timestamp(name: &str) -> Option<NaiveDateTime> {
    let caps = FILENAME_TIMESTAMP.captures(name)?;
    datetime_from_captures(&caps, 4)
}

/// Like [`parse_filename_timestamp`], but a bare `YYYY-MM-DD` also counts
/// and maps to midnight.
pub fn parse_filename_date(name: &str) -> Option<NaiveDateTime> {
    if let Some(dt) = parse_filename_timestamp(name) {
        return Some(dt);
    }
    let caps = FILENAME_DATE.captures(name)?;
    build_datetime(
        caps.get(1)?.as_str().parse().ok()?,
        capture_u32(&caps, 2)?,
        capture_u32(&caps, 3)?,
        0,
        0,
        0,
        None,
    )
}

/// Parses a folder name written as `%Y-%m-%d %I-%M-%S%p`,
/// `%Y-%m-%d_%H-%M-%S` or `%Y-%m-%d %H-%M-%S`.
pub fn parse_folder_timestamp(name: &str) -> Option<NaiveDateTime> {
    let caps = FOLDER_TIMESTAMP.captures(name)?;
    let separator = caps.get(4)?.as_str();
    let has_meridiem = caps.get(8).is_some();
    // 12-hour folders only come with a space separator.
    if has_meridiem && separator != " " {
        return None;
    }
    build_datetime(
        caps.get(1)?.as_str().parse().ok()?,
        capture_u32(&caps, 2)?,
        capture_u32(&caps, 3)?,
        capture_u32(&caps, 5)?,
        capture_u32(&caps, 6)?,
        capture_u32(&caps, 7)?,
        caps.get(8).map(|m| m.as_str()),
    )
}

/// Whether a name already starts with a formatted timestamp.
pub fn has_timestamp_prefix(name: &str) -> bool {
    FORMATTED_PREFIX.is_match(name)
}

/// Whether a stem is exactly a formatted timestamp, optionally `_n`-suffixed.
pub fn is_timestamp_stem(stem: &str) -> bool {
    FORMATTED_STEM.is_match(stem)
}

/// Seconds since the epoch for a local wall-clock time.
pub fn local_epoch_seconds(dt: &NaiveDateTime) -> i64 {
    match Local.from_local_datetime(dt).earliest() {
        Some(local) => local.timestamp(),
        None => dt.and_utc().timestamp(),
    }
}

/// Last modification time as local wall-clock time.
pub fn modified_time(path: &Path) -> Option<NaiveDateTime> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

/// The earlier of birth time (where the platform reports one) and
/// modification time.
pub fn creation_time(path: &Path) -> Option<NaiveDateTime> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok();
    let created = metadata.created().ok();
    let earliest = match (created, modified) {
        (Some(c), Some(m)) => Some(c.min(m)),
        (c, m) => c.or(m),
    }?;
    Some(DateTime::<Local>::from(earliest).naive_local())
}

/// Whether the external `exiftool` binary can be run.
pub fn exiftool_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| match Command::new("exiftool").arg("-ver").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            debug!(version = %version.trim(), "found exiftool");
            true
        }
        _ => {
            warn!("exiftool not found; embedded metadata is neither read nor written");
            false
        }
    })
}

/// Embedded capture time of a photo or video, if any.
pub fn exif_datetime(path: &Path) -> Option<NaiveDateTime> {
    let media = ScanCategory::Photos.matches(path) || ScanCategory::Video.matches(path);
    if !media || !path.is_file() || !exiftool_available() {
        return None;
    }

    let mut command = Command::new("exiftool");
    command.arg("-j");
    for tag in EXIF_DATE_TAGS {
        command.arg(format!("-{}", tag));
    }
    let output = command.arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let json: Value = serde_json::from_slice(&output.stdout).ok()?;
    let record = json.as_array()?.first()?;
    EXIF_DATE_TAGS.iter().find_map(|tag| {
        let raw = record.get(*tag)?.as_str()?;
        // Values may carry sub-seconds or a zone after the first 19 chars.
        let head = raw.get(..19)?;
        NaiveDateTime::parse_from_str(head, EXIF_DATE_FORMAT).ok()
    })
}

/// Writes `dt` into the file's modification/access times and, when
/// `exiftool` is present, into its embedded date tags.
///
/// Returns whether the embedded tags were updated. Filesystem time failures
/// are logged and otherwise ignored.
pub fn write_back(path: &Path, dt: &NaiveDateTime) -> bool {
    let mut exif_written = false;
    if exiftool_available() {
        let stamp = dt.format(EXIF_DATE_FORMAT).to_string();
        let result = Command::new("exiftool")
            .args(["-overwrite_original", "-q"])
            .arg(format!("-AllDates={}", stamp))
            .arg(format!("-CreationDate={}", stamp))
            .arg(format!("-FileCreateDate={}", stamp))
            .arg(format!("-FileModifyDate={}", stamp))
            .arg(format!("-MediaCreateDate={}", stamp))
            .arg(format!("-MediaModifyDate={}", stamp))
            .arg(path)
            .output();
        match result {
            Ok(output) if output.status.success() => exif_written = true,
            Ok(output) => debug!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "exiftool could not update tags"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to run exiftool"),
        }
    }

    let nanos = dt.and_utc().timestamp_subsec_nanos();
    let file_time = FileTime::from_unix_time(local_epoch_seconds(dt), nanos);
    if let Err(e) = filetime::set_file_times(path, file_time, file_time) {
        warn!(path = %path.display(), error = %e, "failed to set file times");
    }
    exif_written
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_presets() {
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_micro_opt(14, 30, 45, 123456)
            .unwrap();
        let default = TimestampFormatter::new(TimestampPreset::Default, None);
        assert_eq!(default.format(&t), "2024-01-01_02-30-45PM");
    }

    #[test]
    fn test_hour_override() {
        let t = dt(2024, 1, 1, 9, 5, 7);
        let twelve = TimestampFormatter::new(TimestampPreset::GooglePhotos, Some(true));
        assert_eq!(twelve.format(&t), "2024-01-01_9-05-07AM");

        let twenty_four = TimestampFormatter::new(TimestampPreset::Pcloud, Some(false));
        assert_eq!(twenty_four.format(&t), "2024-01-01 09-05-07_000000");
    }

    #[test]
    fn test_midnight_and_noon_in_twelve_hour() {
        let f = TimestampFormatter::new(TimestampPreset::Pcloud, None);
        assert_eq!(f.format(&dt(2024, 1, 1, 0, 0, 0)), "2024-01-01 12-00-00AM_000000");
        assert_eq!(f.format(&dt(2024, 1, 1, 12, 0, 0)), "2024-01-01 12-00-00PM_000000");
    }

    #[test]
    fn test_parse_filename_timestamp_variants() {
        assert_eq!(
            parse_filename_timestamp("2024-05-20 14-30-00.jpg"),
            Some(dt(2024, 5, 20, 14, 30, 0))
        );
        assert_eq!(
            parse_filename_timestamp("x_2024-05-20_1-30-00pm.jpg"),
            Some(dt(2024, 5, 20, 13, 30, 0))
        );
        assert_eq!(parse_filename_timestamp("2024-13-20 14-30-00.jpg"), None);
        assert_eq!(parse_filename_timestamp("2024-05-20.jpg"), None);
    }

    #[test]
    fn test_parse_filename_date_only() {
        assert_eq!(
            parse_filename_date("scan 2019-02-03.pdf"),
            Some(dt(2019, 2, 3, 0, 0, 0))
        );
    }

    #[test]
    fn test_parse_folder_timestamp_formats() {
        assert_eq!(
            parse_folder_timestamp("2024-05-20 1-30-00PM"),
            Some(dt(2024, 5, 20, 13, 30, 0))
        );
        assert_eq!(
            parse_folder_timestamp("2025-04-24_13-52-24"),
            Some(dt(2025, 4, 24, 13, 52, 24))
        );
        assert_eq!(
            parse_folder_timestamp("2025-04-24 13-52-24"),
            Some(dt(2025, 4, 24, 13, 52, 24))
        );
        assert_eq!(parse_folder_timestamp("2025-04-24_1-52-24PM"), None);
        assert_eq!(parse_folder_timestamp("Holiday 2025-04-24 13-52-24"), None);
        assert_eq!(parse_folder_timestamp("2025-04-24 13-52-24PM"), None);
        assert_eq!(parse_folder_timestamp("misc"), None);
    }

    #[test]
    fn test_formatted_name_detection() {
        assert!(has_timestamp_prefix("2024-01-01 2-30-45PM_123456_beach.jpg"));
        assert!(has_timestamp_prefix("2024-01-01_14-30-45_beach.jpg"));
        assert!(!has_timestamp_prefix("beach_2024-01-01_14-30-45.jpg"));

        assert!(is_timestamp_stem("2024-01-01 2-30-45PM_123456"));
        assert!(is_timestamp_stem("2024-01-01_14-30-45_2"));
        assert!(!is_timestamp_stem("2024-01-01_14-30-45_beach"));
    }

    #[test]
    fn test_filesystem_times_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "x").expect("Failed to write");

        let target = dt(1993, 7, 12, 10, 0, 0);
        write_back(&path, &target);

        assert_eq!(modified_time(&path), Some(target));
        let created = creation_time(&path).expect("creation time");
        assert!(created <= target);
    }

    #[test]
    fn test_exif_on_non_media_is_none() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("notes.txt");
        fs::write(&path, "x").expect("Failed to write");
        assert_eq!(exif_datetime(&path), None);
    }
}
