//! Fakes shared by the engine tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{CatalogError, Result};
use crate::probe::{ProbeFormat, ProbeOutput, ProbeStream, Prober};

#[derive(Debug, Clone)]
pub enum Script {
    Video { duration: f64, width: u32, height: u32 },
    NoStreams,
    Fail,
}

impl Script {
    pub fn hd(duration: f64) -> Self {
        Script::Video { duration, width: 1920, height: 1080 }
    }
}

/// Prober answering from a per-path script; unscripted paths get a 60s HD video.
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<PathBuf, Script>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &Path, script: Script) {
        self.scripts.lock().unwrap().insert(path.to_path_buf(), script);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, path: &Path) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| p.as_path() == path).count()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Script::hd(60.0));

        match script {
            Script::Video { duration, width, height } => Ok(ProbeOutput {
                format: ProbeFormat { duration: Some(duration), bit_rate: Some(4_000_000) },
                streams: vec![ProbeStream {
                    codec_type: Some("video".into()),
                    codec_name: Some("h264".into()),
                    width: Some(width),
                    height: Some(height),
                    r_frame_rate: Some("30/1".into()),
                    avg_frame_rate: Some("30/1".into()),
                    duration: Some(duration),
                    bit_rate: Some(3_800_000),
                }],
            }),
            Script::NoStreams => Ok(ProbeOutput::default()),
            Script::Fail => Err(CatalogError::ProbeExit {
                code: Some(1),
                stderr: "moov atom not found".to_string(),
            }),
        }
    }
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

/// Pin a file's modified time to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

pub fn mtime_ms(secs: u64) -> i64 {
    crate::types::system_time_ms(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}
