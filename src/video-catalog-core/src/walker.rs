use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::CatalogConfig;

/// A directory the walker could not read; its subtree is absent from the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDir {
    pub path: String,
    pub reason: String,
}

/// Result of walking a set of roots
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<PathBuf>,
    pub skipped: Vec<SkippedDir>,
}

/// List every media file under `roots`.
///
/// Hidden entries, OS metadata directories and non-media files are filtered
/// out. Unreadable directories are logged and skipped; the walk never fails
/// as a whole.
pub fn walk_roots(roots: &[PathBuf], config: &CatalogConfig) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();
    let mut seen = AHashSet::new();

    for root in collapse_roots(roots) {
        if !root.is_dir() {
            warn!(root = %root.display(), "Root is not a readable directory, skipping");
            outcome.skipped.push(SkippedDir {
                path: root.to_string_lossy().into_owned(),
                reason: "not a directory".to_string(),
            });
            continue;
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| should_process_entry(e, config));

        for entry_result in walker {
            match entry_result {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy();
                    if config.accepts_file_name(&name) {
                        let path = entry.into_path();
                        if seen.insert(path.clone()) {
                            outcome.files.push(path);
                        }
                    }
                }
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.clone());
                    warn!(path = %path.display(), error = %err, "Skipping unreadable directory entry");
                    outcome.skipped.push(SkippedDir {
                        path: path.to_string_lossy().into_owned(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    debug!(
        files = outcome.files.len(),
        skipped = outcome.skipped.len(),
        "Walk finished"
    );
    outcome
}

/// Check if a directory entry should be visited
fn should_process_entry(entry: &DirEntry, config: &CatalogConfig) -> bool {
    // Roots are always entered, even when they live under a dot-directory.
    if entry.depth() == 0 {
        return true;
    }

    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        config.accepts_directory_name(&name)
    } else {
        !name.starts_with('.')
    }
}

/// Single-path check used by directory-watch events.
pub fn is_media_file(path: &Path, config: &CatalogConfig) -> bool {
    path.file_name()
        .map(|name| config.accepts_file_name(&name.to_string_lossy()))
        .unwrap_or(false)
}

/// Make roots absolute and drop any root nested inside another one.
pub fn collapse_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for root in roots {
        let root = normalize_root(root);

        if result.iter().any(|kept| root.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&root));
        result.push(root);
    }

    result
}

/// Absolute form with `.` and `..` resolved lexically; symlinks are not followed.
fn normalize_root(root: &Path) -> PathBuf {
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
