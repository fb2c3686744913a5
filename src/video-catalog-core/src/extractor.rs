use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::probe::{ProbeOutput, ProbeStream, Prober};
use crate::types::{EntryFields, FileFacts, MediaFacts, UNKNOWN_CODEC};

/// Derives catalog fields for one file from the filesystem and the probe.
#[derive(Clone)]
pub struct MetadataExtractor {
    prober: Arc<dyn Prober>,
}

impl MetadataExtractor {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Extract filesystem and media facts for `path`.
    ///
    /// A probe that finds no stream still yields fields (zeroed media facts,
    /// codec "unknown"); process failures and malformed output are errors.
    pub async fn extract(&self, path: &Path, root: Option<&Path>) -> Result<EntryFields> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(CatalogError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }

        let file = FileFacts::from_metadata(&metadata);
        let probe = self.prober.probe(path).await?;
        let media = media_facts_from_probe(&probe);

        debug!(
            path = %path.display(),
            duration = media.duration,
            width = media.width,
            height = media.height,
            fps = media.fps,
            codec = media.codec.as_deref().unwrap_or(UNKNOWN_CODEC),
            "Extracted media facts"
        );

        Ok(EntryFields::new(path, root, file, media))
    }
}

/// Pick the first video stream, falling back to the first stream of any kind.
pub fn primary_stream(probe: &ProbeOutput) -> Option<&ProbeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .or_else(|| probe.streams.first())
}

pub fn media_facts_from_probe(probe: &ProbeOutput) -> MediaFacts {
    let Some(stream) = primary_stream(probe) else {
        return MediaFacts::unknown();
    };

    let fps = [stream.r_frame_rate.as_deref(), stream.avg_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .map(parse_frame_rate)
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0);

    let codec = stream
        .codec_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_CODEC)
        .to_string();

    MediaFacts {
        duration: probe.format.duration.or(stream.duration).unwrap_or(0.0).max(0.0),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
        codec: Some(codec),
        bitrate: probe.format.bit_rate.or(stream.bit_rate).unwrap_or(0).max(0),
    }
}

/// Parse `"num/den"` or a plain decimal, rounded to 2 places.
/// A zero denominator or unparsable input yields 0.
pub fn parse_frame_rate(raw: &str) -> f64 {
    let raw = raw.trim();

    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().unwrap_or(0.0);
            let den = den.trim().parse::<f64>().unwrap_or(0.0);
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => raw.parse::<f64>().unwrap_or(0.0),
    };

    if value.is_finite() && value > 0.0 {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}
