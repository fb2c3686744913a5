#![deny(clippy::all)]

//! Media catalog engine: incremental directory reconciliation against a
//! persistent catalog, probe-based metadata extraction, and partial-content
//! duplicate detection.

pub mod config;
pub mod duplicates;
pub mod error;
pub mod extractor;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod removal;
pub mod sqlite;
pub mod store;
pub mod thumbnail;
pub mod types;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use config::{CatalogConfig, RescanCompareField};
pub use duplicates::{
    compute_fingerprint, group_duplicates, DeletionFailure, DeletionReport, DuplicateDetector,
    DuplicateGroup, FingerprintReport, FINGERPRINT_CHUNK_SIZE,
};
pub use error::{CatalogError, Result};
pub use extractor::MetadataExtractor;
pub use probe::{FfprobeProber, ProbeOutput, Prober};
pub use progress::{ProgressSink, ProgressUpdate, SilentProgress};
pub use reconcile::{Classification, FileError, ReconcileEngine, ReconcileReport, RescanReport};
pub use removal::{SystemTrasher, Trasher};
pub use sqlite::SqliteCatalog;
pub use store::CatalogStore;
pub use thumbnail::{FfmpegThumbnailer, Thumbnailer};
pub use types::{CatalogEntry, EntryFields, EntryPatch, FileFacts, MediaFacts};
pub use walker::{is_media_file, walk_roots, SkippedDir, WalkOutcome};
