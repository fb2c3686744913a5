use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::{CatalogConfig, RescanCompareField};
use crate::error::{CatalogError, Result};
use crate::extractor::MetadataExtractor;
use crate::probe::Prober;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::store::CatalogStore;
use crate::thumbnail::{remove_thumbnail, Thumbnailer};
use crate::types::{path_key, CatalogEntry, EntryFields, EntryPatch, FileFacts};
use crate::walker::{collapse_roots, is_media_file, walk_roots, SkippedDir, WalkOutcome};

/// What a pass decided for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    New,
    Updated,
    Degraded,
    Unchanged,
    Deleted,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Updated => "updated",
            Classification::Degraded => "degraded",
            Classification::Unchanged => "unchanged",
            Classification::Deleted => "deleted",
        }
    }
}

/// A per-file failure recorded instead of aborting the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub path: String,
    pub error: String,
    pub error_code: String,
    pub timestamp: DateTime<Utc>,
}

impl FileError {
    pub fn new(path: impl Into<String>, err: &CatalogError) -> Self {
        Self {
            path: path.into(),
            error: err.to_string(),
            error_code: err.code(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of an incremental pass. Every prior or current path lands in
/// exactly one of the five classification lists or in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub new: Vec<String>,
    pub updated: Vec<String>,
    pub degraded_reprocessed: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<FileError>,
    pub skipped_directories: Vec<SkippedDir>,
    pub elapsed_ms: u64,
}

impl ReconcileReport {
    fn record(&mut self, class: Classification, path: String) {
        match class {
            Classification::New => self.new.push(path),
            Classification::Updated => self.updated.push(path),
            Classification::Degraded => self.degraded_reprocessed.push(path),
            Classification::Unchanged => self.unchanged.push(path),
            Classification::Deleted => self.deleted.push(path),
        }
    }

    /// Classification reported for `path`, if any.
    pub fn classification_of(&self, path: &str) -> Option<Classification> {
        let buckets = [
            (&self.new, Classification::New),
            (&self.updated, Classification::Updated),
            (&self.degraded_reprocessed, Classification::Degraded),
            (&self.unchanged, Classification::Unchanged),
            (&self.deleted, Classification::Deleted),
        ];
        buckets
            .iter()
            .find(|(paths, _)| paths.iter().any(|p| p == path))
            .map(|(_, class)| *class)
    }

    /// True when the pass added, modified or removed catalog records.
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty()
            || !self.updated.is_empty()
            || !self.degraded_reprocessed.is_empty()
            || !self.deleted.is_empty()
    }
}

/// Outcome of a forced re-extraction of every current file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanReport {
    pub new: Vec<String>,
    /// Previously cataloged paths whose compared fields differ after re-extraction.
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<FileError>,
    pub skipped_directories: Vec<SkippedDir>,
    pub total_processed: usize,
    pub total_updated: usize,
    pub total_errors: usize,
    pub elapsed_ms: u64,
}

impl RescanCompareField {
    /// True when this field differs between the stored record and fresh fields.
    pub fn differs(self, prior: &CatalogEntry, next: &EntryFields) -> bool {
        match self {
            RescanCompareField::Duration => {
                prior.media.duration.to_bits() != next.media.duration.to_bits()
            }
            RescanCompareField::Width => prior.media.width != next.media.width,
            RescanCompareField::Height => prior.media.height != next.media.height,
            RescanCompareField::Size => prior.file.size != next.file.size,
            RescanCompareField::Title => prior.title != next.title,
            RescanCompareField::Codec => prior.media.codec != next.media.codec,
            RescanCompareField::Fps => prior.media.fps.to_bits() != next.media.fps.to_bits(),
            RescanCompareField::Bitrate => prior.media.bitrate != next.media.bitrate,
        }
    }
}

/// Keeps the catalog in step with the media files under a set of roots.
pub struct ReconcileEngine {
    store: Arc<dyn CatalogStore>,
    extractor: MetadataExtractor,
    thumbnailer: Option<Arc<dyn Thumbnailer>>,
    config: CatalogConfig,
    known_roots: RwLock<Vec<PathBuf>>,
}

impl ReconcileEngine {
    pub fn new(store: Arc<dyn CatalogStore>, prober: Arc<dyn Prober>, config: CatalogConfig) -> Self {
        Self {
            store,
            extractor: MetadataExtractor::new(prober),
            thumbnailer: None,
            config,
            known_roots: RwLock::new(Vec::new()),
        }
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.thumbnailer = Some(thumbnailer);
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn is_media_file(&self, path: &Path) -> bool {
        is_media_file(path, &self.config)
    }

    /// Incremental pass: extract only new, modified and degraded files, drop
    /// records for files that disappeared.
    pub async fn reconcile(
        &self,
        roots: &[PathBuf],
        progress: &dyn ProgressSink,
    ) -> Result<ReconcileReport> {
        let started = Instant::now();
        let existing = self.store.list_all()?;
        let walk = self.walk(roots).await?;

        let mut report = ReconcileReport::default();
        let previous = self
            .drop_missing(
                existing,
                &walk,
                &mut report.deleted,
                &mut report.unchanged,
                &mut report.errors,
            )
            .await;
        report.skipped_directories = walk.skipped;

        let total = walk.files.len();
        for (index, path) in walk.files.iter().enumerate() {
            let key = path_key(path);
            let label = match self
                .classify_and_refresh(path, &key, previous.get(&key), false)
                .await
            {
                Ok((class, _)) => {
                    report.record(class, key.clone());
                    class.as_str()
                }
                Err(err) => {
                    warn!(path = %key, error = %err, "Failed to process file");
                    report.errors.push(FileError::new(key.as_str(), &err));
                    "error"
                }
            };
            progress.on_progress(&ProgressUpdate::new(index + 1, total, key).with_message(label));
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            new = report.new.len(),
            updated = report.updated.len(),
            degraded = report.degraded_reprocessed.len(),
            unchanged = report.unchanged.len(),
            deleted = report.deleted.len(),
            errors = report.errors.len(),
            elapsed_ms = report.elapsed_ms,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Forced pass: re-extract every current file regardless of modified time.
    pub async fn full_rescan(
        &self,
        roots: &[PathBuf],
        progress: &dyn ProgressSink,
    ) -> Result<RescanReport> {
        let started = Instant::now();
        let existing = self.store.list_all()?;
        let walk = self.walk(roots).await?;

        let mut report = RescanReport::default();
        let mut untouched = Vec::new();
        let previous = self
            .drop_missing(
                existing,
                &walk,
                &mut report.deleted,
                &mut untouched,
                &mut report.errors,
            )
            .await;
        report.skipped_directories = walk.skipped;

        let total = walk.files.len();
        for (index, path) in walk.files.iter().enumerate() {
            let key = path_key(path);
            let prior = previous.get(&key);
            report.total_processed += 1;

            let label = match self.classify_and_refresh(path, &key, prior, true).await {
                Ok((class, fields)) => {
                    report.total_updated += 1;
                    match (prior, fields) {
                        (Some(prior), Some(fields)) if self.materially_changed(prior, &fields) => {
                            report.changed.push(key.clone());
                        }
                        (None, _) => report.new.push(key.clone()),
                        _ => {}
                    }
                    class.as_str()
                }
                Err(err) => {
                    warn!(path = %key, error = %err, "Failed to re-extract file");
                    report.errors.push(FileError::new(key.as_str(), &err));
                    "error"
                }
            };
            progress.on_progress(&ProgressUpdate::new(index + 1, total, key).with_message(label));
        }

        report.total_errors = report.errors.len();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = report.total_processed,
            changed = report.changed.len(),
            new = report.new.len(),
            deleted = report.deleted.len(),
            errors = report.total_errors,
            elapsed_ms = report.elapsed_ms,
            "Full rescan finished"
        );
        Ok(report)
    }

    /// Bring a single path up to date, as a watch event would.
    ///
    /// Returns `Ok(None)` for paths that are not media files.
    pub async fn process_file(&self, path: &Path, force: bool) -> Result<Option<CatalogEntry>> {
        if !self.is_media_file(path) {
            debug!(path = %path.display(), "Ignoring non-media path");
            return Ok(None);
        }

        let key = path_key(path);
        let prior = self.store.find_by_path(&key)?;
        let (class, fields) = self
            .classify_and_refresh(path, &key, prior.as_ref(), force)
            .await?;
        debug!(path = %key, classification = class.as_str(), "Processed file");

        match fields {
            None => Ok(prior),
            Some(_) => self.store.find_by_path(&key),
        }
    }

    /// Drop the record for `path` along with its thumbnail.
    pub async fn forget_path(&self, path: &Path) -> Result<bool> {
        let key = path_key(path);
        let prior = self.store.find_by_path(&key)?;
        let removed = self.store.delete_by_path(&key)?;
        if removed {
            debug!(path = %path.display(), "Removed catalog entry");
            if let Some(thumbnail) = prior.as_ref().and_then(|e| e.thumbnail_path.as_deref()) {
                self.discard_thumbnail(thumbnail).await;
            }
        }
        Ok(removed)
    }

    /// Drop every record under `dir` along with their thumbnails.
    pub async fn forget_directory(&self, dir: &Path) -> Result<usize> {
        let key = path_key(dir);
        let thumbnails: Vec<String> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|e| Path::new(&e.path).starts_with(&key))
            .filter_map(|e| e.thumbnail_path)
            .collect();

        let removed = self.store.delete_under(&key)?;
        for thumbnail in &thumbnails {
            self.discard_thumbnail(thumbnail).await;
        }
        info!(dir = %dir.display(), removed, "Removed catalog entries for deleted directory");
        Ok(removed)
    }

    async fn walk(&self, roots: &[PathBuf]) -> Result<WalkOutcome> {
        *self
            .known_roots
            .write()
            .unwrap_or_else(PoisonError::into_inner) = collapse_roots(roots);

        let roots = roots.to_vec();
        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || walk_roots(&roots, &config)).await?;
        Ok(outcome)
    }

    /// Remove records whose file is gone and index the rest by path.
    ///
    /// Records under a directory the walk could not read stay in the catalog
    /// and are reported as unchanged.
    async fn drop_missing(
        &self,
        existing: Vec<CatalogEntry>,
        walk: &WalkOutcome,
        deleted: &mut Vec<String>,
        untouched: &mut Vec<String>,
        errors: &mut Vec<FileError>,
    ) -> AHashMap<String, CatalogEntry> {
        let current: AHashSet<String> = walk.files.iter().map(|p| path_key(p)).collect();
        let mut previous = AHashMap::with_capacity(existing.len());

        for entry in existing {
            if current.contains(&entry.path) {
                previous.insert(entry.path.clone(), entry);
                continue;
            }

            let unreadable = walk
                .skipped
                .iter()
                .any(|dir| Path::new(&entry.path).starts_with(&dir.path));
            if unreadable {
                debug!(path = %entry.path, "Keeping entry under unreadable directory");
                untouched.push(entry.path);
                continue;
            }

            match self.store.delete_by_path(&entry.path) {
                Ok(_) => {
                    debug!(path = %entry.path, "File gone, removed catalog entry");
                    if let Some(thumbnail) = entry.thumbnail_path.as_deref() {
                        self.discard_thumbnail(thumbnail).await;
                    }
                    deleted.push(entry.path);
                }
                Err(err) => {
                    error!(path = %entry.path, error = %err, "Failed to remove catalog entry");
                    errors.push(FileError::new(entry.path, &err));
                }
            }
        }

        previous
    }

    /// Classify one current path and re-extract it when needed (or always,
    /// when `force` is set). Returns the fresh fields when extraction ran.
    async fn classify_and_refresh(
        &self,
        path: &Path,
        key: &str,
        prior: Option<&CatalogEntry>,
        force: bool,
    ) -> Result<(Classification, Option<EntryFields>)> {
        let metadata = fs::metadata(path).await?;
        let modified_ms = FileFacts::from_metadata(&metadata).modified_ms;

        let class = match prior {
            None => Classification::New,
            Some(prior) if prior.file.modified_ms != modified_ms => Classification::Updated,
            Some(prior) if prior.is_degraded() => Classification::Degraded,
            Some(_) => Classification::Unchanged,
        };

        if class == Classification::Unchanged && !force {
            return Ok((class, None));
        }

        let previous_thumbnail = prior.and_then(|p| p.thumbnail_path.as_deref());
        let fields = self.refresh(path, key, previous_thumbnail).await?;
        Ok((class, Some(fields)))
    }

    async fn refresh(
        &self,
        path: &Path,
        key: &str,
        previous_thumbnail: Option<&str>,
    ) -> Result<EntryFields> {
        let root = self.owning_root(path);
        let fields = self.extractor.extract(path, root.as_deref()).await?;
        let id = self.store.upsert(key, &fields)?;
        self.attach_thumbnail(id, path, &fields, previous_thumbnail).await;
        Ok(fields)
    }

    /// Generate and record the thumbnail, replacing a stale file from an
    /// earlier extraction.
    async fn attach_thumbnail(
        &self,
        id: i64,
        path: &Path,
        fields: &EntryFields,
        previous: Option<&str>,
    ) {
        if !self.config.generate_thumbnails || fields.media.width == 0 {
            return;
        }
        let Some(thumbnailer) = &self.thumbnailer else {
            return;
        };

        match thumbnailer.generate(path, &fields.media).await {
            Ok(thumbnail) => {
                let thumbnail = path_key(&thumbnail);
                if let Err(err) = self
                    .store
                    .update_fields(id, &EntryPatch::thumbnail(thumbnail.clone()))
                {
                    warn!(path = %path.display(), error = %err, "Failed to record thumbnail");
                    return;
                }
                if let Some(stale) = previous.filter(|old| *old != thumbnail) {
                    self.discard_thumbnail(stale).await;
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Thumbnail generation failed");
            }
        }
    }

    async fn discard_thumbnail(&self, thumbnail: &str) {
        let thumbnail = Path::new(thumbnail);
        let removed = match &self.thumbnailer {
            Some(thumbnailer) => thumbnailer.remove(thumbnail).await,
            None => remove_thumbnail(thumbnail).await,
        };
        if let Err(err) = removed {
            warn!(path = %thumbnail.display(), error = %err, "Failed to remove thumbnail");
        }
    }

    fn materially_changed(&self, prior: &CatalogEntry, next: &EntryFields) -> bool {
        self.config
            .rescan_compare_fields
            .iter()
            .any(|field| field.differs(prior, next))
    }

    fn owning_root(&self, path: &Path) -> Option<PathBuf> {
        self.known_roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|root| path.starts_with(root))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteCatalog;
    use crate::test_support::{mtime_ms, set_mtime, write_file, Script, ScriptedProber};
    use crate::types::MediaFacts;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<SqliteCatalog>,
        prober: Arc<ScriptedProber>,
        engine: ReconcileEngine,
    }

    fn harness() -> Harness {
        harness_with(CatalogConfig::default())
    }

    fn harness_with(config: CatalogConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        std::fs::create_dir_all(&root).unwrap();
        let store = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let prober = Arc::new(ScriptedProber::new());
        let engine = ReconcileEngine::new(store.clone(), prober.clone(), config);
        Harness { _dir: dir, root, store, prober, engine }
    }

    impl Harness {
        fn add(&self, rel: &str, mtime_secs: u64) -> PathBuf {
            let path = self.root.join(rel);
            write_file(&path, rel.as_bytes());
            set_mtime(&path, mtime_secs);
            path
        }

        async fn pass(&self) -> ReconcileReport {
            self.engine
                .reconcile(&[self.root.clone()], &crate::progress::SilentProgress)
                .await
                .unwrap()
        }

        fn entry(&self, path: &Path) -> Option<CatalogEntry> {
            self.store.find_by_path(&path_key(path)).unwrap()
        }
    }

    fn key(path: &Path) -> String {
        path_key(path)
    }

    fn sorted(mut paths: Vec<String>) -> Vec<String> {
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let h = harness();
        let a = h.add("a.mp4", 1_000);
        let b = h.add("shows/b.mkv", 1_000);

        let first = h.pass().await;
        assert_eq!(sorted(first.new.clone()), sorted(vec![key(&a), key(&b)]));
        assert_eq!(h.prober.call_count(), 2);

        let second = h.pass().await;
        assert!(second.new.is_empty());
        assert!(second.updated.is_empty());
        assert!(second.deleted.is_empty());
        assert!(second.degraded_reprocessed.is_empty());
        assert!(!second.has_changes());
        assert_eq!(sorted(second.unchanged), sorted(vec![key(&a), key(&b)]));
        assert_eq!(h.prober.call_count(), 2, "unchanged files must not be probed");

        assert_eq!(h.entry(&b).unwrap().folder, "shows");
        assert_eq!(h.entry(&a).unwrap().folder, "");
    }

    #[tokio::test]
    async fn test_classifications_partition_paths() {
        let h = harness();
        let a = h.add("a.mp4", 1_000);
        let b = h.add("b.mp4", 1_000);
        let c = h.add("c.mp4", 1_000);
        let d = h.add("d.mp4", 1_000);
        h.prober.set(&c, Script::NoStreams);

        let first = h.pass().await;
        assert_eq!(first.new.len(), 4);
        assert!(h.entry(&c).unwrap().is_degraded());

        set_mtime(&b, 2_000);
        h.prober.set(&c, Script::hd(90.0));
        std::fs::remove_file(&d).unwrap();
        let e = h.add("e.mp4", 1_000);

        let report = h.pass().await;
        assert_eq!(report.new, vec![key(&e)]);
        assert_eq!(report.updated, vec![key(&b)]);
        assert_eq!(report.degraded_reprocessed, vec![key(&c)]);
        assert_eq!(report.unchanged, vec![key(&a)]);
        assert_eq!(report.deleted, vec![key(&d)]);
        assert!(report.errors.is_empty());

        for path in [&a, &b, &c, &d, &e] {
            let hits = [
                &report.new,
                &report.updated,
                &report.degraded_reprocessed,
                &report.unchanged,
                &report.deleted,
            ]
            .iter()
            .filter(|bucket| bucket.contains(&key(path)))
            .count();
            assert_eq!(hits, 1, "{} must be classified exactly once", path.display());
        }
        assert_eq!(report.classification_of(&key(&c)), Some(Classification::Degraded));
    }

    #[tokio::test]
    async fn test_degraded_entry_heals() {
        let h = harness();
        let clip = h.add("clip.mp4", 1_000);
        h.prober.set(&clip, Script::NoStreams);

        h.pass().await;
        let stored = h.entry(&clip).unwrap();
        assert_eq!(stored.media, MediaFacts::unknown());

        h.prober.set(&clip, Script::hd(42.0));
        let report = h.pass().await;
        assert_eq!(report.degraded_reprocessed, vec![key(&clip)]);

        let healed = h.entry(&clip).unwrap();
        assert!(!healed.is_degraded());
        assert_eq!(healed.media.width, 1920);
        assert_eq!(healed.id, stored.id);

        let third = h.pass().await;
        assert_eq!(third.unchanged, vec![key(&clip)]);
    }

    #[tokio::test]
    async fn test_deleted_file_removes_only_its_record() {
        let h = harness();
        let keep = h.add("keep.mp4", 1_000);
        let gone = h.add("gone.mp4", 1_000);
        h.pass().await;

        std::fs::remove_file(&gone).unwrap();
        let report = h.pass().await;

        assert_eq!(report.deleted, vec![key(&gone)]);
        assert!(h.entry(&gone).is_none());
        assert!(h.entry(&keep).is_some());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn test_failed_extraction_keeps_prior_entry() {
        let h = harness();
        let f1 = h.add("f1.mp4", 1_000);
        let f2 = h.add("f2.mp4", 1_000);
        let f3 = h.add("f3.mp4", 1_000);
        h.pass().await;
        let before = h.entry(&f2).unwrap();

        for path in [&f1, &f2, &f3] {
            set_mtime(path, 5_000);
        }
        h.prober.set(&f2, Script::Fail);
        let fresh = h.add("fresh.mp4", 5_000);
        h.prober.set(&fresh, Script::Fail);

        let report = h.pass().await;
        assert_eq!(sorted(report.updated.clone()), sorted(vec![key(&f1), key(&f3)]));
        assert_eq!(report.errors.len(), 2);

        let err = report.errors.iter().find(|e| e.path == key(&f2)).unwrap();
        assert_eq!(err.error_code, "probe-exit-1");
        assert!(err.error.contains("moov atom"));
        assert_eq!(report.classification_of(&key(&f2)), None);

        assert_eq!(h.entry(&f2).unwrap(), before);
        assert!(h.entry(&fresh).is_none());
        assert_eq!(h.entry(&f1).unwrap().file.modified_ms, mtime_ms(5_000));
    }

    #[tokio::test]
    async fn test_modified_time_change_is_update() {
        let h = harness();
        let t1 = 1_700_000_000;
        let t2 = t1 + 60;
        let video = h.add("video.mov", t1);

        let first = h.pass().await;
        assert_eq!(first.new, vec![key(&video)]);
        assert_eq!(h.entry(&video).unwrap().file.modified_ms, mtime_ms(t1));

        set_mtime(&video, t2);
        let second = h.pass().await;
        assert_eq!(second.updated, vec![key(&video)]);
        assert_eq!(h.entry(&video).unwrap().file.modified_ms, mtime_ms(t2));
    }

    #[tokio::test]
    async fn test_progress_after_each_file() {
        let h = harness();
        h.add("a.mp4", 1_000);
        h.add("b.mp4", 1_000);
        h.add("notes.txt", 1_000);

        let seen = Mutex::new(Vec::new());
        let sink = |update: &ProgressUpdate| {
            seen.lock().unwrap().push((update.current, update.total, update.message.clone()))
        };
        h.engine.reconcile(&[h.root.clone()], &sink).await.unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, 2);
        assert_eq!(seen[1].1, 2);
        assert_eq!(seen[0].2.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_missing_root_keeps_entries() {
        let h = harness();
        let clip = h.add("clip.mp4", 1_000);
        h.pass().await;

        let moved = h.root.with_file_name("unmounted");
        std::fs::rename(&h.root, &moved).unwrap();

        let report = h.pass().await;
        assert!(report.deleted.is_empty());
        assert_eq!(report.unchanged, vec![key(&clip)]);
        assert_eq!(report.skipped_directories.len(), 1);
        assert!(h.entry(&clip).is_some());
    }

    #[tokio::test]
    async fn test_full_rescan_reports_material_changes() {
        let h = harness();
        let a = h.add("a.mp4", 1_000);
        let b = h.add("b.mp4", 1_000);
        h.pass().await;
        let calls = h.prober.call_count();

        h.prober.set(&a, Script::Video { duration: 60.0, width: 1280, height: 720 });
        let c = h.add("c.mp4", 1_000);

        let report = h
            .engine
            .full_rescan(&[h.root.clone()], &crate::progress::SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.changed, vec![key(&a)]);
        assert_eq!(report.new, vec![key(&c)]);
        assert_eq!(report.total_processed, 3);
        assert_eq!(report.total_updated, 3);
        assert_eq!(report.total_errors, 0);
        assert_eq!(h.prober.call_count(), calls + 3);
        assert_eq!(h.prober.calls_for(&b), 2);
        assert_eq!(h.entry(&a).unwrap().media.width, 1280);
    }

    #[tokio::test]
    async fn test_full_rescan_honors_compare_fields() {
        let config = CatalogConfig {
            rescan_compare_fields: vec![RescanCompareField::Codec],
            ..CatalogConfig::default()
        };
        let h = harness_with(config);
        let a = h.add("a.mp4", 1_000);
        h.pass().await;

        h.prober.set(&a, Script::Video { duration: 60.0, width: 640, height: 360 });
        let report = h
            .engine
            .full_rescan(&[h.root.clone()], &crate::progress::SilentProgress)
            .await
            .unwrap();
        assert!(report.changed.is_empty());

        h.prober.set(&a, Script::NoStreams);
        let report = h
            .engine
            .full_rescan(&[h.root.clone()], &crate::progress::SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.changed, vec![key(&a)]);
    }

    #[tokio::test]
    async fn test_process_file() {
        let h = harness();
        let clip = h.add("clip.mp4", 1_000);
        let notes = h.add("notes.txt", 1_000);
        h.pass().await;

        assert!(h.engine.process_file(&notes, false).await.unwrap().is_none());

        let calls = h.prober.call_count();
        let entry = h.engine.process_file(&clip, false).await.unwrap().unwrap();
        assert_eq!(entry.path, key(&clip));
        assert_eq!(h.prober.call_count(), calls);

        h.prober.set(&clip, Script::hd(12.5));
        let forced = h.engine.process_file(&clip, true).await.unwrap().unwrap();
        assert_eq!(forced.media.duration, 12.5);
        assert_eq!(forced.folder, "");

        let added = h.add("later/added.webm", 1_000);
        let entry = h.engine.process_file(&added, false).await.unwrap().unwrap();
        assert_eq!(entry.folder, "later");
    }

    #[tokio::test]
    async fn test_root_spelling_does_not_churn() {
        let h = harness();
        let a = h.add("a.mp4", 1_000);
        h.pass().await;

        let respelled = h.root.join("shows").join("..");
        let report = h
            .engine
            .reconcile(&[respelled], &crate::progress::SilentProgress)
            .await
            .unwrap();
        assert!(!report.has_changes());
        assert_eq!(report.unchanged, vec![key(&a)]);
    }

    #[tokio::test]
    async fn test_forget_path_and_directory() {
        let h = harness();
        let top = h.add("top.mp4", 1_000);
        h.add("season/e01.mkv", 1_000);
        h.add("season/e02.mkv", 1_000);
        h.add("seasonal.mp4", 1_000);
        h.pass().await;

        assert!(h.engine.forget_path(&top).await.unwrap());
        assert!(!h.engine.forget_path(&top).await.unwrap());
        assert_eq!(
            h.engine
                .forget_directory(&h.root.join("season"))
                .await
                .unwrap(),
            2
        );
        assert_eq!(h.store.count().unwrap(), 1);
    }

    /// Fails writes for chosen paths, delegating everything else.
    struct FlakyStore {
        inner: SqliteCatalog,
        fail_upsert: String,
        fail_delete: String,
    }

    fn injected() -> CatalogError {
        CatalogError::Database(rusqlite::Error::QueryReturnedNoRows)
    }

    impl CatalogStore for FlakyStore {
        fn list_all(&self) -> Result<Vec<CatalogEntry>> {
            self.inner.list_all()
        }
        fn find_by_path(&self, path: &str) -> Result<Option<CatalogEntry>> {
            self.inner.find_by_path(path)
        }
        fn find_by_id(&self, id: i64) -> Result<Option<CatalogEntry>> {
            self.inner.find_by_id(id)
        }
        fn upsert(&self, path: &str, fields: &EntryFields) -> Result<i64> {
            if path == self.fail_upsert {
                return Err(injected());
            }
            self.inner.upsert(path, fields)
        }
        fn delete_by_path(&self, path: &str) -> Result<bool> {
            if path == self.fail_delete {
                return Err(injected());
            }
            self.inner.delete_by_path(path)
        }
        fn delete_by_id(&self, id: i64) -> Result<bool> {
            self.inner.delete_by_id(id)
        }
        fn update_fields(&self, id: i64, patch: &EntryPatch) -> Result<bool> {
            self.inner.update_fields(id, patch)
        }
        fn delete_under(&self, dir: &str) -> Result<usize> {
            self.inner.delete_under(dir)
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let ok = root.join("ok.mp4");
        let broken = root.join("broken.mp4");
        write_file(&ok, b"ok");
        write_file(&broken, b"broken");

        let inner = SqliteCatalog::open_in_memory().unwrap();
        let orphan = root.join("orphan.mp4");
        inner
            .upsert(
                &key(&orphan),
                &EntryFields::new(&orphan, None, FileFacts::default(), MediaFacts::unknown()),
            )
            .unwrap();

        let store = Arc::new(FlakyStore {
            inner,
            fail_upsert: key(&broken),
            fail_delete: key(&orphan),
        });
        let engine = ReconcileEngine::new(
            store.clone(),
            Arc::new(ScriptedProber::new()),
            CatalogConfig::default(),
        );

        let report = engine
            .reconcile(&[root], &crate::progress::SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.new, vec![key(&ok)]);
        assert!(report.deleted.is_empty());

        let mut failed: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        failed.sort();
        let mut expected = vec![key(&broken), key(&orphan)];
        expected.sort();
        assert_eq!(failed, expected);
        assert!(report.errors.iter().all(|e| e.error_code == "database"));
        assert!(store.find_by_path(&key(&orphan)).unwrap().is_some());
    }

    struct FakeThumbnailer {
        dir: PathBuf,
    }

    /// Names each frame after the video and its duration, so a re-timed
    /// video gets a new file.
    #[async_trait]
    impl Thumbnailer for FakeThumbnailer {
        async fn generate(&self, video_path: &Path, media: &MediaFacts) -> Result<PathBuf> {
            let name = video_path.file_stem().unwrap().to_string_lossy().into_owned();
            let out = self.dir.join(format!("{}-{}.jpg", name, media.duration as u64));
            std::fs::create_dir_all(&self.dir)?;
            std::fs::write(&out, b"jpeg")?;
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_thumbnails_recorded_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = dir.path().join("thumbs");
        let config = CatalogConfig {
            generate_thumbnails: true,
            thumbnail_dir: Some(thumbs.clone()),
            ..CatalogConfig::default()
        };

        let h = harness_with(config);
        let engine = ReconcileEngine::new(h.store.clone(), h.prober.clone(), h.engine.config().clone())
            .with_thumbnailer(Arc::new(FakeThumbnailer { dir: thumbs.clone() }));

        let clip = h.add("clip.mp4", 1_000);
        let audio = h.add("audio.mp4", 1_000);
        h.prober.set(&audio, Script::NoStreams);

        engine
            .reconcile(&[h.root.clone()], &crate::progress::SilentProgress)
            .await
            .unwrap();

        assert_eq!(
            h.entry(&clip).unwrap().thumbnail_path,
            Some(key(&thumbs.join("clip-60.jpg")))
        );
        assert_eq!(h.entry(&audio).unwrap().thumbnail_path, None);
    }

    async fn run(engine: &ReconcileEngine, root: &Path) -> ReconcileReport {
        engine
            .reconcile(&[root.to_path_buf()], &crate::progress::SilentProgress)
            .await
            .unwrap()
    }

    fn thumbnail_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_stale_thumbnails_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = dir.path().join("thumbs");
        let config = CatalogConfig {
            generate_thumbnails: true,
            thumbnail_dir: Some(thumbs.clone()),
            ..CatalogConfig::default()
        };

        let h = harness_with(config);
        let engine = ReconcileEngine::new(h.store.clone(), h.prober.clone(), h.engine.config().clone())
            .with_thumbnailer(Arc::new(FakeThumbnailer { dir: thumbs.clone() }));

        let clip = h.add("clip.mp4", 1_000);
        let gone = h.add("gone.mp4", 1_000);
        let single = h.add("single.mp4", 1_000);
        h.add("season/e01.mkv", 1_000);
        run(&engine, &h.root).await;
        assert_eq!(
            thumbnail_files(&thumbs),
            vec!["clip-60.jpg", "e01-60.jpg", "gone-60.jpg", "single-60.jpg"]
        );

        // Re-timed video: the new frame replaces the old one.
        h.prober.set(&clip, Script::hd(90.0));
        set_mtime(&clip, 2_000);
        std::fs::remove_file(&gone).unwrap();
        let report = run(&engine, &h.root).await;
        assert_eq!(report.updated, vec![key(&clip)]);
        assert_eq!(report.deleted, vec![key(&gone)]);
        assert_eq!(
            h.entry(&clip).unwrap().thumbnail_path,
            Some(key(&thumbs.join("clip-90.jpg")))
        );
        assert_eq!(
            thumbnail_files(&thumbs),
            vec!["clip-90.jpg", "e01-60.jpg", "single-60.jpg"]
        );

        assert!(engine.forget_path(&single).await.unwrap());
        assert_eq!(engine.forget_directory(&h.root.join("season")).await.unwrap(), 1);
        assert_eq!(thumbnail_files(&thumbs), vec!["clip-90.jpg"]);
    }
}
