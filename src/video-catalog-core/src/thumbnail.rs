use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::types::MediaFacts;

/// Produces the primary still frame for a catalog entry.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn generate(&self, video_path: &Path, media: &MediaFacts) -> Result<PathBuf>;

    async fn remove(&self, thumbnail_path: &Path) -> Result<()> {
        remove_thumbnail(thumbnail_path).await
    }
}

/// Delete a thumbnail file; one that is already gone counts as removed.
pub async fn remove_thumbnail(thumbnail_path: &Path) -> Result<()> {
    match fs::remove_file(thumbnail_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Extracts frames with the external `ffmpeg` binary into a sharded cache directory.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    binary: String,
    cache_dir: PathBuf,
    width: u32,
}

impl FfmpegThumbnailer {
    pub fn new(binary: impl Into<String>, cache_dir: PathBuf, width: u32) -> Self {
        Self {
            binary: binary.into(),
            cache_dir,
            width: width.max(16),
        }
    }

    /// Generate cache key from video path + timestamp
    pub fn cache_key(video_path: &str, timestamp: f64) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(video_path.as_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Get cache file path for a key
    pub fn cache_path(&self, key: &str) -> PathBuf {
        // First two hex chars pick the subdirectory.
        let subdir = &key[..2.min(key.len())];
        self.cache_dir.join(subdir).join(format!("{}.jpg", key))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Seek position for the primary frame: 10% in, at least 1s, at most 30s,
/// and never past the last second of the video.
pub fn smart_timestamp(duration: f64) -> f64 {
    if !duration.is_finite() || duration <= 0.0 {
        return 0.0;
    }

    (duration * 0.1).clamp(1.0, 30.0).min(duration - 1.0).max(0.0)
}

#[async_trait]
impl Thumbnailer for FfmpegThumbnailer {
    async fn generate(&self, video_path: &Path, media: &MediaFacts) -> Result<PathBuf> {
        let timestamp = smart_timestamp(media.duration);
        let key = Self::cache_key(&video_path.to_string_lossy(), timestamp);
        let output_path = self.cache_path(&key);

        if let Ok(metadata) = fs::metadata(&output_path).await {
            if metadata.len() > 0 {
                return Ok(output_path);
            }
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write under a temporary name, then rename into place.
        let temp_path = output_path.with_extension("tmp.jpg");
        let output = Command::new(&self.binary)
            .args(["-v", "error", "-y", "-ss", &format!("{:.3}", timestamp), "-i"])
            .arg(video_path)
            .args([
                "-frames:v",
                "1",
                "-vf",
                &format!("scale={}:-2", self.width),
            ])
            .arg(&temp_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CatalogError::ProcessSpawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CatalogError::Thumbnail(format!(
                "ffmpeg failed for {}: {}",
                video_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        fs::rename(&temp_path, &output_path).await?;
        debug!(video = %video_path.display(), thumbnail = %output_path.display(), "Thumbnail written");
        Ok(output_path)
    }
}
