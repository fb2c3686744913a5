use std::sync::{Arc, Mutex, PoisonError};
use video_catalog_core::{ProgressSink, ProgressUpdate};

use crate::types::{CatalogProgress, NativeError};

#[derive(Debug, Default)]
struct ProgressState {
    operation: Option<&'static str>,
    processed: usize,
    total: usize,
    current_file: Option<String>,
}

/// Latest progress of the running operation, polled from JavaScript.
///
/// Only one catalog-wide operation runs at a time.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
}

/// Marks the operation finished when dropped.
pub struct RunGuard {
    tracker: Arc<ProgressTracker>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.tracker.lock() = ProgressState::default();
    }
}

impl ProgressTracker {
    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(self: &Arc<Self>, operation: &'static str) -> Result<RunGuard, NativeError> {
        let mut state = self.lock();
        if let Some(running) = state.operation {
            return Err(NativeError::Busy(running.to_string()));
        }
        *state = ProgressState {
            operation: Some(operation),
            ..ProgressState::default()
        };
        Ok(RunGuard {
            tracker: Arc::clone(self),
        })
    }

    pub fn snapshot(&self) -> CatalogProgress {
        let state = self.lock();
        let progress = if state.total > 0 {
            (state.processed as f64 / state.total as f64) * 100.0
        } else {
            0.0
        };

        CatalogProgress {
            is_running: state.operation.is_some(),
            operation: state.operation.map(str::to_string),
            progress,
            processed_files: state.processed as u32,
            total_files: state.total as u32,
            current_file: state.current_file.clone(),
        }
    }
}

impl ProgressSink for ProgressTracker {
    fn on_progress(&self, update: &ProgressUpdate) {
        let mut state = self.lock();
        state.processed = update.current;
        state.total = update.total;
        state.current_file = Some(update.file.clone());
    }
}
