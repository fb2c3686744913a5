use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{CatalogError, Result};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::removal::Trasher;
use crate::store::CatalogStore;
use crate::thumbnail::{remove_thumbnail, Thumbnailer};
use crate::types::{CatalogEntry, EntryPatch};

/// Bytes hashed from each sampled region.
pub const FINGERPRINT_CHUNK_SIZE: u64 = 64 * 1024;

/// Partial content fingerprint: BLAKE3 over the first, middle and last
/// chunk, or over the whole file when it is smaller than three chunks.
pub fn compute_fingerprint(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = blake3::Hasher::new();

    if size < 3 * FINGERPRINT_CHUNK_SIZE {
        io::copy(&mut file, &mut hasher)?;
    } else {
        let mut buf = vec![0u8; FINGERPRINT_CHUNK_SIZE as usize];
        let offsets = [
            0,
            size / 2 - FINGERPRINT_CHUNK_SIZE / 2,
            size - FINGERPRINT_CHUNK_SIZE,
        ];
        for offset in offsets {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
            hasher.update(&buf);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintReport {
    pub computed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Two or more catalog entries with identical size, duration and fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub size: u64,
    pub duration: f64,
    pub fingerprint: String,
    /// Sorted by path.
    pub entries: Vec<CatalogEntry>,
    /// Bytes reclaimable by keeping a single copy.
    pub wasted_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionFailure {
    pub id: i64,
    pub path: Option<String>,
    pub error: String,
    pub error_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub success: Vec<i64>,
    pub failed: Vec<i64>,
    pub errors: Vec<DeletionFailure>,
}

impl DeletionReport {
    fn fail(&mut self, id: i64, path: Option<String>, err: &CatalogError) {
        warn!(id, path = path.as_deref().unwrap_or("-"), error = %err, "Failed to delete video");
        self.failed.push(id);
        self.errors.push(DeletionFailure {
            id,
            path,
            error: err.to_string(),
            error_code: err.code(),
        });
    }
}

/// Group key: -0.0 and 0.0 durations compare equal.
fn duration_bits(duration: f64) -> u64 {
    if duration == 0.0 {
        0.0f64.to_bits()
    } else {
        duration.to_bits()
    }
}

/// Single-pass grouping on (size, duration, fingerprint). Entries without a
/// fingerprint never group. Largest reclaimable groups come first.
pub fn group_duplicates(entries: Vec<CatalogEntry>) -> Vec<DuplicateGroup> {
    let mut buckets: AHashMap<(u64, u64, String), Vec<CatalogEntry>> = AHashMap::new();

    for entry in entries {
        let Some(fingerprint) = entry.fingerprint.clone() else {
            continue;
        };
        let key = (entry.file.size, duration_bits(entry.media.duration), fingerprint);
        buckets.entry(key).or_default().push(entry);
    }

    let mut groups: Vec<DuplicateGroup> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|((size, _, fingerprint), mut entries)| {
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            DuplicateGroup {
                size,
                duration: entries[0].media.duration,
                fingerprint,
                wasted_bytes: size.saturating_mul(entries.len() as u64 - 1),
                entries,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.wasted_bytes
            .cmp(&a.wasted_bytes)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
            .then_with(|| a.entries[0].path.cmp(&b.entries[0].path))
    });
    groups
}

/// Fingerprints catalog entries, groups duplicates, and removes chosen copies.
pub struct DuplicateDetector {
    store: Arc<dyn CatalogStore>,
    trasher: Arc<dyn Trasher>,
    thumbnailer: Option<Arc<dyn Thumbnailer>>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn CatalogStore>, trasher: Arc<dyn Trasher>) -> Self {
        Self {
            store,
            trasher,
            thumbnailer: None,
        }
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.thumbnailer = Some(thumbnailer);
        self
    }

    /// Compute and store a fingerprint for every entry that lacks one.
    pub async fn update_fingerprints(&self, progress: &dyn ProgressSink) -> Result<FingerprintReport> {
        let started = Instant::now();
        let pending: Vec<CatalogEntry> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|entry| entry.fingerprint.is_none())
            .collect();

        let mut report = FingerprintReport::default();
        let total = pending.len();

        for (index, entry) in pending.into_iter().enumerate() {
            let path = PathBuf::from(&entry.path);
            let label = if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(path = %entry.path, "Skipping fingerprint, file missing");
                report.missing += 1;
                "missing"
            } else {
                let hash_path = path.clone();
                match tokio::task::spawn_blocking(move || compute_fingerprint(&hash_path)).await {
                    Ok(Ok(fingerprint)) => {
                        match self.store.update_fields(entry.id, &EntryPatch::fingerprint(fingerprint)) {
                            Ok(_) => {
                                report.computed += 1;
                                "fingerprinted"
                            }
                            Err(err) => {
                                error!(path = %entry.path, error = %err, "Failed to store fingerprint");
                                report.failed += 1;
                                "error"
                            }
                        }
                    }
                    Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                        debug!(path = %entry.path, "File vanished before hashing");
                        report.missing += 1;
                        "missing"
                    }
                    Ok(Err(err)) => {
                        warn!(path = %entry.path, error = %err, "Failed to fingerprint file");
                        report.failed += 1;
                        "error"
                    }
                    Err(err) => {
                        warn!(path = %entry.path, error = %err, "Fingerprint task failed");
                        report.failed += 1;
                        "error"
                    }
                }
            };

            progress.on_progress(
                &ProgressUpdate::new(index + 1, total, entry.path).with_message(label),
            );
        }

        info!(
            computed = report.computed,
            missing = report.missing,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fingerprint pass finished"
        );
        Ok(report)
    }

    /// Fill in missing fingerprints, then group the whole catalog.
    pub async fn find_duplicates(&self, progress: &dyn ProgressSink) -> Result<Vec<DuplicateGroup>> {
        self.update_fingerprints(progress).await?;
        let groups = group_duplicates(self.store.list_all()?);

        info!(
            groups = groups.len(),
            wasted_bytes = groups.iter().map(|g| g.wasted_bytes).sum::<u64>(),
            "Duplicate search finished"
        );
        Ok(groups)
    }

    /// Remove the media file, its thumbnail and its catalog record for each
    /// id. Items succeed or fail independently.
    pub async fn delete_videos(
        &self,
        ids: &[i64],
        move_to_trash: bool,
        progress: &dyn ProgressSink,
    ) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();
        let total = ids.len();

        for (index, &id) in ids.iter().enumerate() {
            let entry = match self.store.find_by_id(id) {
                Ok(Some(entry)) => Some(entry),
                Ok(None) => {
                    report.fail(id, None, &CatalogError::EntryNotFound(id));
                    None
                }
                Err(err) => {
                    report.fail(id, None, &err);
                    None
                }
            };

            let label = match entry {
                Some(entry) => match self.delete_entry(&entry, move_to_trash).await {
                    Ok(()) => {
                        report.success.push(id);
                        entry.path
                    }
                    Err(err) => {
                        report.fail(id, Some(entry.path.clone()), &err);
                        entry.path
                    }
                },
                None => id.to_string(),
            };

            progress.on_progress(&ProgressUpdate::new(index + 1, total, label));
        }

        info!(
            deleted = report.success.len(),
            failed = report.failed.len(),
            move_to_trash,
            "Deletion finished"
        );
        Ok(report)
    }

    async fn delete_entry(&self, entry: &CatalogEntry, move_to_trash: bool) -> Result<()> {
        let path = PathBuf::from(&entry.path);

        if tokio::fs::try_exists(&path).await.unwrap_or(true) {
            let trasher = self.trasher.clone();
            let target = path.clone();
            let removed =
                tokio::task::spawn_blocking(move || trasher.trash_or_delete(&target, move_to_trash))
                    .await?;
            match removed {
                Ok(()) => debug!(path = %entry.path, move_to_trash, "Removed media file"),
                Err(err) if err.is_not_found() => {
                    warn!(path = %entry.path, "Media file already gone");
                }
                Err(err) => return Err(err),
            }
        } else {
            warn!(path = %entry.path, "Media file already gone");
        }

        if let Some(thumbnail) = entry.thumbnail_path.as_deref() {
            let thumbnail = Path::new(thumbnail);
            let removed = match &self.thumbnailer {
                Some(thumbnailer) => thumbnailer.remove(thumbnail).await,
                None => remove_thumbnail(thumbnail).await,
            };
            if let Err(err) = removed {
                warn!(path = %thumbnail.display(), error = %err, "Failed to remove thumbnail");
            }
        }

        self.store.delete_by_id(entry.id)?;
        Ok(())
    }
}
