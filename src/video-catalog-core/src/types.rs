use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, MAIN_SEPARATOR};
use std::time::{SystemTime, UNIX_EPOCH};

/// Supported video file extensions
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".webm", ".ogg", ".mov", ".avi", ".wmv", ".flv", ".mkv", ".m4v",
];

/// System file prefix to exclude (AppleDouble resource forks)
pub const SYSTEM_FILE_PREFIX: &str = "._";

/// OS metadata files that never hold media
pub const JUNK_FILES: &[&str] = &["Thumbs.db", "desktop.ini", ".DS_Store"];

/// Directories to exclude from scanning
pub const EXCLUDED_DIRECTORIES: &[&str] = &[
    "node_modules",
    "$RECYCLE.BIN",
    "System Volume Information",
    "@eaDir",
    "lost+found",
];

/// Codec name recorded when the probe reports no usable stream.
pub const UNKNOWN_CODEC: &str = "unknown";

/// Filesystem facts for one media file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFacts {
    pub size: u64,
    /// Creation time in Unix milliseconds, 0 when the platform does not record it.
    pub created_ms: i64,
    /// Last-modified time in Unix milliseconds.
    pub modified_ms: i64,
}

impl FileFacts {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            created_ms: metadata.created().map(system_time_ms).unwrap_or(0),
            modified_ms: metadata.modified().map(system_time_ms).unwrap_or(0),
        }
    }
}

/// Facts reported by the probe. Zero means "not extracted".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFacts {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: Option<String>,
    pub bitrate: i64,
}

impl MediaFacts {
    /// Facts for a file the probe could open but found no stream in.
    pub fn unknown() -> Self {
        Self {
            codec: Some(UNKNOWN_CODEC.to_string()),
            ..Self::default()
        }
    }

    /// True when extraction left any fact missing or zeroed.
    pub fn is_degraded(&self) -> bool {
        let codec_missing = match self.codec.as_deref() {
            None => true,
            Some(codec) => codec.is_empty() || codec.eq_ignore_ascii_case(UNKNOWN_CODEC),
        };

        self.width == 0
            || self.height == 0
            || self.duration <= 0.0
            || self.fps <= 0.0
            || codec_missing
    }
}

/// Everything an extraction produces for a path; the input to a catalog upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFields {
    pub name: String,
    pub title: String,
    pub folder: String,
    pub file: FileFacts,
    pub media: MediaFacts,
}

impl EntryFields {
    pub fn new(path: &Path, root: Option<&Path>, file: FileFacts, media: MediaFacts) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());

        Self {
            name,
            title,
            folder: folder_label(path, root),
            file,
            media,
        }
    }
}

/// One persisted record per on-disk media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub title: String,
    pub folder: String,
    pub file: FileFacts,
    pub media: MediaFacts,
    pub fingerprint: Option<String>,
    pub thumbnail_path: Option<String>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn is_degraded(&self) -> bool {
        self.media.is_degraded()
    }
}

/// Partial update applied by `CatalogStore::update_fields`.
///
/// `None` leaves a column alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub fingerprint: Option<Option<String>>,
    pub thumbnail_path: Option<Option<String>>,
}

impl EntryPatch {
    pub fn fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: Some(Some(fingerprint.into())),
            ..Self::default()
        }
    }

    pub fn thumbnail(path: impl Into<String>) -> Self {
        Self {
            thumbnail_path: Some(Some(path.into())),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprint.is_none() && self.thumbnail_path.is_none()
    }
}

/// Check if a filename represents a valid video file
pub fn is_valid_video_file(filename: &str, extensions: &[String]) -> bool {
    if filename.starts_with('.') || filename.starts_with(SYSTEM_FILE_PREFIX) {
        return false;
    }

    if JUNK_FILES
        .iter()
        .any(|junk| junk.eq_ignore_ascii_case(filename))
    {
        return false;
    }

    let lowercase = filename.to_lowercase();
    extensions
        .iter()
        .any(|ext| lowercase.ends_with(ext.as_str()))
}

/// Default extension list as owned strings.
pub fn default_extensions() -> Vec<String> {
    VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Lowercase and dot-prefix a configured extension (`"MKV"` -> `".mkv"`).
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Folder name shown for a file: the last directory between `root` and the
/// file, or empty when the file sits directly in the root. Without a root the
/// parent directory name is used.
pub fn folder_label(path: &Path, root: Option<&Path>) -> String {
    let Some(root) = root else {
        return path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    };

    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return String::new(),
    };

    let relative_str = relative.to_string_lossy();

    // If no path separator, file is in root directory
    if !relative_str.contains(MAIN_SEPARATOR) {
        return String::new();
    }

    let parts: Vec<&str> = relative_str
        .split(MAIN_SEPARATOR)
        .filter(|part| !part.is_empty() && *part != "." && !part.starts_with(SYSTEM_FILE_PREFIX))
        .collect();

    if parts.len() <= 1 {
        return String::new();
    }

    parts[parts.len() - 2].to_string()
}

/// Catalog key for a path.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
