//! ffprobe/ffmpeg wrappers.

use super::{part_count, part_path, AudioTools};
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Audio tools backed by the ffmpeg suite on `PATH`.
#[derive(Debug, Default, Clone)]
pub struct FfmpegAudio;

impl FfmpegAudio {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioTools for FfmpegAudio {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        probe_duration(path).await
    }

    #[instrument(skip(self), fields(source = %source.display()))]
    async fn split(&self, source: &Path, total_seconds: f64, max_seconds: f64) -> Result<Vec<PathBuf>> {
        let count = part_count(total_seconds, max_seconds);
        let mut parts = Vec::with_capacity(count as usize);

        for index in 0..count {
            let start = f64::from(index) * max_seconds;
            let length = max_seconds.min(total_seconds - start);
            let dest = part_path(source, index);

            if let Err(e) = extract_segment(source, &dest, start, length).await {
                for part in parts.iter().chain(std::iter::once(&dest)) {
                    let _ = tokio::fs::remove_file(part).await;
                }
                return Err(e);
            }

            debug!("Created part {} at offset {:.1}s", index, start);
            parts.push(dest);
        }

        info!("Split into {} parts", parts.len());
        Ok(parts)
    }
}

/// Extracts a time segment from an audio file.
async fn extract_segment(source: &Path, dest: &Path, start: f64, length: f64) -> Result<()> {
    // Stream copy first: fast and lossless.
    let copy_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-c").arg("copy")
        .arg("-y")
        .arg("-loglevel").arg("warning")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match copy_result {
        Ok(status) if status.success() && dest.exists() => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HarkError::ToolNotFound("ffmpeg".into()));
        }
        _ => {}
    }

    warn!("Stream copy failed, re-encoding segment");

    let encode_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match encode_result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(HarkError::ToolFailed(format!("ffmpeg segment extraction failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HarkError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(HarkError::Audio(format!("ffmpeg error: {e}"))),
    }
}

/// Queries the duration of an audio file using ffprobe with JSON output.
async fn probe_duration(path: &Path) -> Result<f64> {
    let result = Command::new("ffprobe")
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HarkError::ToolNotFound("ffprobe".into()));
        }
        Err(e) => {
            return Err(HarkError::Audio(format!("ffprobe failed: {e}")));
        }
    };

    if !output.status.success() {
        return Err(HarkError::ToolFailed("ffprobe returned error".into()));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<f64> {
    let parsed: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|_| HarkError::Audio("Invalid ffprobe output".into()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| HarkError::Audio("Could not determine audio duration".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{"format": {"filename": "a.mp3", "duration": "5423.120000"}}"#;
        assert!((parse_probe_output(json).unwrap() - 5423.12).abs() < 1e-6);

        assert!(parse_probe_output(br#"{"format": {}}"#).is_err());
        assert!(parse_probe_output(b"garbage").is_err());
    }
}
