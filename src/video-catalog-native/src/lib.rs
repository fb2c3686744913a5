#![deny(clippy::all)]

use napi_derive::napi;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use video_catalog_core::types::{default_extensions, is_valid_video_file};
use video_catalog_core::{
    CatalogConfig, CatalogStore, DuplicateDetector, FfmpegThumbnailer, FfprobeProber,
    ReconcileEngine, SqliteCatalog, SystemTrasher, Thumbnailer,
};

mod logging;
mod progress;
mod types;
mod watch;

use progress::ProgressTracker;
use types::{
    CatalogProgress, DeletionResult, DuplicateGroupInfo, FingerprintResult, NativeError,
    ReconcileResult, RescanResult, VideoEntry,
};
use watch::WatchRegistry;

/// VideoCatalogNative - persistent media catalog kept in sync with watched folders
#[napi]
pub struct VideoCatalogNative {
    engine: Arc<ReconcileEngine>,
    detector: DuplicateDetector,
    store: Arc<SqliteCatalog>,
    progress: Arc<ProgressTracker>,
    watcher: Mutex<WatchRegistry>,
}

#[napi]
impl VideoCatalogNative {
    /// Open (or create) the catalog database
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite catalog file
    /// * `config_json` - Optional JSON configuration; absent keys keep their defaults
    #[napi(constructor)]
    pub fn new(db_path: String, config_json: Option<String>) -> napi::Result<Self> {
        logging::init_logger();

        let config = match config_json {
            Some(json) => CatalogConfig::from_json(&json).map_err(NativeError::from)?,
            None => CatalogConfig::default(),
        };

        let store = Arc::new(SqliteCatalog::open(&db_path).map_err(NativeError::from)?);
        let prober = Arc::new(FfprobeProber::new(config.probe_binary.clone()));
        let mut engine = ReconcileEngine::new(store.clone(), prober, config.clone());
        let mut detector = DuplicateDetector::new(store.clone(), Arc::new(SystemTrasher));

        if let (true, Some(dir)) = (config.generate_thumbnails, config.thumbnail_dir.clone()) {
            let thumbnailer: Arc<dyn Thumbnailer> = Arc::new(FfmpegThumbnailer::new(
                config.ffmpeg_binary.clone(),
                dir,
                config.thumbnail_width,
            ));
            engine = engine.with_thumbnailer(Arc::clone(&thumbnailer));
            detector = detector.with_thumbnailer(thumbnailer);
        }

        let engine = Arc::new(engine);
        info!(db = %db_path, "Catalog opened");

        Ok(Self {
            watcher: Mutex::new(WatchRegistry::new(Arc::clone(&engine))),
            engine,
            detector,
            store,
            progress: Arc::new(ProgressTracker::default()),
        })
    }

    /// Bring the catalog in line with the media files under `roots`
    ///
    /// Only new, modified and degraded files are probed.
    #[napi]
    pub async fn reconcile(&self, roots: Vec<String>) -> napi::Result<ReconcileResult> {
        let _run = self.progress.begin("reconcile")?;
        let roots: Vec<PathBuf> = roots.into_iter().map(PathBuf::from).collect();
        let report = self
            .engine
            .reconcile(&roots, self.progress.as_ref())
            .await
            .map_err(NativeError::from)?;
        Ok(report.into())
    }

    /// Re-probe every media file under `roots`
    #[napi]
    pub async fn full_rescan(&self, roots: Vec<String>) -> napi::Result<RescanResult> {
        let _run = self.progress.begin("fullRescan")?;
        let roots: Vec<PathBuf> = roots.into_iter().map(PathBuf::from).collect();
        let report = self
            .engine
            .full_rescan(&roots, self.progress.as_ref())
            .await
            .map_err(NativeError::from)?;
        Ok(report.into())
    }

    /// Catalog a single file
    ///
    /// # Returns
    /// The stored entry, or null when the path is not a media file
    #[napi]
    pub async fn process_file(
        &self,
        path: String,
        force: Option<bool>,
    ) -> napi::Result<Option<VideoEntry>> {
        let entry = self
            .engine
            .process_file(Path::new(&path), force.unwrap_or(false))
            .await
            .map_err(NativeError::from)?;
        Ok(entry.map(Into::into))
    }

    /// Check a path against the configured media filters
    #[napi]
    pub fn is_media_file(&self, path: String) -> bool {
        self.engine.is_media_file(Path::new(&path))
    }

    /// Compute missing content fingerprints
    #[napi]
    pub async fn update_fingerprints(&self) -> napi::Result<FingerprintResult> {
        let _run = self.progress.begin("updateFingerprints")?;
        let report = self
            .detector
            .update_fingerprints(self.progress.as_ref())
            .await
            .map_err(NativeError::from)?;
        Ok(report.into())
    }

    /// Group videos with identical size, duration and fingerprint
    #[napi]
    pub async fn find_duplicates(&self) -> napi::Result<Vec<DuplicateGroupInfo>> {
        let _run = self.progress.begin("findDuplicates")?;
        let groups = self
            .detector
            .find_duplicates(self.progress.as_ref())
            .await
            .map_err(NativeError::from)?;
        Ok(groups.into_iter().map(Into::into).collect())
    }

    /// Delete videos by catalog id
    ///
    /// # Arguments
    /// * `ids` - Catalog ids to delete
    /// * `move_to_trash` - Use the system trash instead of permanent deletion
    #[napi]
    pub async fn delete_videos(
        &self,
        ids: Vec<i64>,
        move_to_trash: bool,
    ) -> napi::Result<DeletionResult> {
        let _run = self.progress.begin("deleteVideos")?;
        let report = self
            .detector
            .delete_videos(&ids, move_to_trash, self.progress.as_ref())
            .await
            .map_err(NativeError::from)?;
        Ok(report.into())
    }

    /// Get progress of the running operation
    #[napi]
    pub fn get_progress(&self) -> CatalogProgress {
        self.progress.snapshot()
    }

    /// Keep the catalog updated as files under `path` change
    #[napi]
    pub async fn start_watching(&self, path: String) -> napi::Result<()> {
        let mut watcher = self.watcher.lock().await;
        watcher.start_watching(Path::new(&path))?;
        Ok(())
    }

    /// Stop watching `path`
    ///
    /// # Returns
    /// false if the path was not being watched
    #[napi]
    pub async fn stop_watching(&self, path: String) -> napi::Result<bool> {
        let mut watcher = self.watcher.lock().await;
        Ok(watcher.stop_watching(Path::new(&path)))
    }

    #[napi]
    pub async fn stop_all(&self) -> napi::Result<()> {
        self.watcher.lock().await.stop_all();
        Ok(())
    }

    #[napi]
    pub async fn get_watched_paths(&self) -> napi::Result<Vec<String>> {
        Ok(self.watcher.lock().await.watched())
    }

    /// Get every catalog entry
    #[napi]
    pub fn get_entries(&self) -> napi::Result<Vec<VideoEntry>> {
        let entries = self.store.list_all().map_err(NativeError::from)?;
        Ok(entries.into_iter().map(Into::into).collect())
    }
}

/// Standalone function to check if a file is a valid video
#[napi]
pub fn is_valid_video(filename: String) -> bool {
    is_valid_video_file(&filename, &default_extensions())
}

/// Get supported video extensions
#[napi]
pub fn get_supported_extensions() -> Vec<String> {
    default_extensions()
}
