use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};
use crate::types::{
    default_extensions, is_valid_video_file, normalize_extension, EXCLUDED_DIRECTORIES,
    JUNK_FILES,
};

/// Fields compared after a forced rescan to decide whether a re-extracted
/// file is reported as changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescanCompareField {
    Duration,
    Width,
    Height,
    Size,
    Title,
    Codec,
    Fps,
    Bitrate,
}

/// Configuration for the catalog engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Media extensions, matched case-insensitively against file names.
    pub extensions: Vec<String>,
    /// Directory names never descended into (hidden directories are always skipped).
    pub ignored_directories: Vec<String>,
    /// Exact file names never cataloged, compared case-insensitively.
    pub ignored_files: Vec<String>,
    pub probe_binary: String,
    pub ffmpeg_binary: String,
    pub generate_thumbnails: bool,
    pub thumbnail_dir: Option<PathBuf>,
    pub thumbnail_width: u32,
    pub rescan_compare_fields: Vec<RescanCompareField>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignored_directories: EXCLUDED_DIRECTORIES.iter().map(|s| s.to_string()).collect(),
            ignored_files: JUNK_FILES.iter().map(|s| s.to_string()).collect(),
            probe_binary: "ffprobe".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
            generate_thumbnails: false,
            thumbnail_dir: None,
            thumbnail_width: 640,
            rescan_compare_fields: vec![
                RescanCompareField::Duration,
                RescanCompareField::Width,
                RescanCompareField::Height,
                RescanCompareField::Size,
                RescanCompareField::Title,
            ],
        }
    }
}

impl CatalogConfig {
    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CatalogConfig = serde_json::from_str(json)
            .map_err(|e| CatalogError::Config(format!("invalid config JSON: {}", e)))?;
        config.normalized()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    fn normalized(mut self) -> Result<Self> {
        self.extensions = self
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| ext.len() > 1)
            .collect();

        if self.extensions.is_empty() {
            return Err(CatalogError::Config(
                "at least one media extension is required".to_string(),
            ));
        }

        if self.generate_thumbnails && self.thumbnail_dir.is_none() {
            return Err(CatalogError::Config(
                "generateThumbnails requires thumbnailDir".to_string(),
            ));
        }

        Ok(self)
    }

    /// True for file names the walker would catalog.
    pub fn accepts_file_name(&self, name: &str) -> bool {
        is_valid_video_file(name, &self.extensions)
            && !self.ignored_files.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    /// True for directory names the walker descends into.
    pub fn accepts_directory_name(&self, name: &str) -> bool {
        !name.starts_with('.') && !self.ignored_directories.iter().any(|d| d == name)
    }
}
