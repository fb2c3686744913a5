use std::io;
use thiserror::Error;

/// Error types for catalog operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to run {binary}: {source}")]
    ProcessSpawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("Probe exited with status {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ProbeExit { code: Option<i32>, stderr: String },

    #[error("Malformed probe output: {0}")]
    MalformedProbe(#[from] serde_json::Error),

    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    #[error("Trash error: {0}")]
    Trash(String),

    #[error("Catalog entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CatalogError {
    /// Short machine-readable code reported alongside per-file failures.
    pub fn code(&self) -> String {
        match self {
            CatalogError::Io(e) => format!("io-{:?}", e.kind()).to_lowercase(),
            CatalogError::Database(_) => "database".to_string(),
            CatalogError::ProcessSpawn { .. } => "probe-spawn".to_string(),
            CatalogError::ProbeExit { code: Some(code), .. } => format!("probe-exit-{}", code),
            CatalogError::ProbeExit { code: None, .. } => "probe-killed".to_string(),
            CatalogError::MalformedProbe(_) => "probe-malformed".to_string(),
            CatalogError::Thumbnail(_) => "thumbnail".to_string(),
            CatalogError::Trash(_) => "trash".to_string(),
            CatalogError::EntryNotFound(_) => "not-found".to_string(),
            CatalogError::Config(_) => "config".to_string(),
            CatalogError::Join(_) => "task".to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::Io(e) if e.kind() == io::ErrorKind::NotFound)
            || matches!(self, CatalogError::EntryNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
