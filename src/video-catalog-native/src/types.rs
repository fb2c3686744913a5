use napi_derive::napi;
use serde::{Deserialize, Serialize};
use video_catalog_core::{
    CatalogEntry, CatalogError, DeletionFailure, DeletionReport, DuplicateGroup, FileError,
    FingerprintReport, ReconcileReport, RescanReport, SkippedDir,
};

/// A catalog record as seen from JavaScript
#[napi(object)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub title: String,
    pub folder: String,
    pub size: f64,
    pub created: f64,
    pub last_modified: f64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    pub bitrate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    pub added_at: String,
    pub updated_at: String,
}

impl From<CatalogEntry> for VideoEntry {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            id: entry.id,
            path: entry.path,
            name: entry.name,
            title: entry.title,
            folder: entry.folder,
            size: entry.file.size as f64,
            created: entry.file.created_ms as f64,
            last_modified: entry.file.modified_ms as f64,
            duration: entry.media.duration,
            width: entry.media.width,
            height: entry.media.height,
            fps: entry.media.fps,
            codec: entry.media.codec,
            bitrate: entry.media.bitrate as f64,
            fingerprint: entry.fingerprint,
            thumbnail_path: entry.thumbnail_path,
            added_at: entry.added_at.to_rfc3339(),
            updated_at: entry.updated_at.to_rfc3339(),
        }
    }
}

#[napi(object)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileErrorInfo {
    pub path: String,
    pub error: String,
    pub error_code: String,
    pub timestamp: String,
}

impl From<FileError> for FileErrorInfo {
    fn from(err: FileError) -> Self {
        Self {
            path: err.path,
            error: err.error,
            error_code: err.error_code,
            timestamp: err.timestamp.to_rfc3339(),
        }
    }
}

#[napi(object)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedDirectory {
    pub path: String,
    pub reason: String,
}

impl From<SkippedDir> for SkippedDirectory {
    fn from(dir: SkippedDir) -> Self {
        Self {
            path: dir.path,
            reason: dir.reason,
        }
    }
}

/// Result of an incremental reconciliation pass
#[napi(object)]
#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub new: Vec<String>,
    pub updated: Vec<String>,
    pub degraded_reprocessed: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<FileErrorInfo>,
    pub skipped_directories: Vec<SkippedDirectory>,
    pub elapsed_ms: f64,
}

impl From<ReconcileReport> for ReconcileResult {
    fn from(report: ReconcileReport) -> Self {
        Self {
            new: report.new,
            updated: report.updated,
            degraded_reprocessed: report.degraded_reprocessed,
            unchanged: report.unchanged,
            deleted: report.deleted,
            errors: report.errors.into_iter().map(Into::into).collect(),
            skipped_directories: report.skipped_directories.into_iter().map(Into::into).collect(),
            elapsed_ms: report.elapsed_ms as f64,
        }
    }
}

/// Result of a forced full rescan
#[napi(object)]
#[derive(Debug, Serialize, Deserialize)]
pub struct RescanResult {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<FileErrorInfo>,
    pub skipped_directories: Vec<SkippedDirectory>,
    pub total_processed: u32,
    pub total_updated: u32,
    pub total_errors: u32,
    pub elapsed_ms: f64,
}

impl From<RescanReport> for RescanResult {
    fn from(report: RescanReport) -> Self {
        Self {
            new: report.new,
            changed: report.changed,
            deleted: report.deleted,
            errors: report.errors.into_iter().map(Into::into).collect(),
            skipped_directories: report.skipped_directories.into_iter().map(Into::into).collect(),
            total_processed: report.total_processed as u32,
            total_updated: report.total_updated as u32,
            total_errors: report.total_errors as u32,
            elapsed_ms: report.elapsed_ms as f64,
        }
    }
}

#[napi(object)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintResult {
    pub computed: u32,
    pub missing: u32,
    pub failed: u32,
}

impl From<FingerprintReport> for FingerprintResult {
    fn from(report: FingerprintReport) -> Self {
        Self {
            computed: report.computed as u32,
            missing: report.missing as u32,
            failed: report.failed as u32,
        }
    }
}

/// Videos sharing size, duration and content fingerprint
#[napi(object)]
#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateGroupInfo {
    pub size: f64,
    pub duration: f64,
    pub fingerprint: String,
    pub wasted_bytes: f64,
    pub videos: Vec<VideoEntry>,
}

impl From<DuplicateGroup> for DuplicateGroupInfo {
    fn from(group: DuplicateGroup) -> Self {
        Self {
            size: group.size as f64,
            duration: group.duration,
            fingerprint: group.fingerprint,
            wasted_bytes: group.wasted_bytes as f64,
            videos: group.entries.into_iter().map(Into::into).collect(),
        }
    }
}

#[napi(object)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionErrorInfo {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub error: String,
    pub error_code: String,
}

impl From<DeletionFailure> for DeletionErrorInfo {
    fn from(failure: DeletionFailure) -> Self {
        Self {
            id: failure.id,
            path: failure.path,
            error: failure.error,
            error_code: failure.error_code,
        }
    }
}

#[napi(object)]
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletionResult {
    pub success: Vec<i64>,
    pub failed: Vec<i64>,
    pub errors: Vec<DeletionErrorInfo>,
}

impl From<DeletionReport> for DeletionResult {
    fn from(report: DeletionReport) -> Self {
        Self {
            success: report.success,
            failed: report.failed,
            errors: report.errors.into_iter().map(Into::into).collect(),
        }
    }
}

/// Progress of the running catalog operation
#[napi(object)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProgress {
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub progress: f64,
    pub processed_files: u32,
    pub total_files: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

/// Errors raised at the binding boundary
#[derive(thiserror::Error, Debug)]
pub enum NativeError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Already watching {0}")]
    AlreadyWatching(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Operation already in progress: {0}")]
    Busy(String),
}

impl From<NativeError> for napi::Error {
    fn from(err: NativeError) -> Self {
        napi::Error::from_reason(err.to_string())
    }
}
