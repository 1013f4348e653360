//! Audio acquisition and processing.
//!
//! Two capabilities sit behind traits so the pipeline can run against fakes:
//! fetching a remote file to disk, and probing/splitting it with ffmpeg.

mod fetcher;
mod ffmpeg;

pub use fetcher::HttpFetcher;
pub use ffmpeg::FfmpegAudio;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Extensions recognised in enclosure URLs.
const KNOWN_EXTENSIONS: [&str; 4] = ["mp3", "m4a", "wav", "ogg"];
const DEFAULT_EXTENSION: &str = "mp3";

/// Downloads a remote file to a local path.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Stream `url` into `dest`. Returns the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Local audio inspection and splitting.
#[async_trait]
pub trait AudioTools: Send + Sync {
    /// Duration of the file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Cut `source` into consecutive parts no longer than `max_seconds`,
    /// written beside it as [`part_path`]`(source, i)`. Returns the parts in order.
    async fn split(&self, source: &Path, total_seconds: f64, max_seconds: f64) -> Result<Vec<PathBuf>>;
}

/// Pick a file extension for an enclosure URL.
pub fn audio_extension(url: &str) -> &'static str {
    let from_path = url::Url::parse(url).ok().and_then(|parsed| {
        let path = parsed.path().to_lowercase();
        KNOWN_EXTENSIONS
            .into_iter()
            .find(|ext| path.ends_with(&format!(".{}", ext)))
    });

    from_path
        .or_else(|| {
            let lower = url.to_lowercase();
            KNOWN_EXTENSIONS
                .into_iter()
                .find(|ext| lower.contains(&format!(".{}", ext)))
        })
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Where an episode's downloaded audio lives.
pub fn episode_audio_path(audio_dir: &Path, episode_id: i64, url: &str) -> PathBuf {
    audio_dir.join(format!("episode_{}.{}", episode_id, audio_extension(url)))
}

/// Deterministic path of part `index` of a split file.
pub fn part_path(source: &Path, index: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let ext = source
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_EXTENSION);
    source.with_file_name(format!("{}_part{}.{}", stem, index, ext))
}

/// Number of parts needed so that none exceeds `max_seconds`.
pub fn part_count(total_seconds: f64, max_seconds: f64) -> u32 {
    if total_seconds <= max_seconds || max_seconds <= 0.0 {
        return 1;
    }
    (total_seconds / max_seconds).ceil() as u32
}

/// Best-effort removal of a source file and any parts cut from it.
pub async fn remove_audio_files(source: &Path) {
    let _ = tokio::fs::remove_file(source).await;
    let mut index = 0;
    loop {
        let part = part_path(source, index);
        if tokio::fs::remove_file(&part).await.is_err() {
            break;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_extension() {
        assert_eq!(audio_extension("https://cdn.example.com/ep1.m4a"), "m4a");
        assert_eq!(audio_extension("https://cdn.example.com/ep1.MP3?token=abc"), "mp3");
        assert_eq!(audio_extension("https://track.example.com/redirect/cdn.example.com/x.ogg/"), "ogg");
        assert_eq!(audio_extension("https://cdn.example.com/stream?id=5"), "mp3");
        assert_eq!(audio_extension("not a url.wav"), "wav");
    }

    #[test]
    fn test_episode_audio_path() {
        let path = episode_audio_path(Path::new("/data/audio"), 42, "https://x.com/a.m4a");
        assert_eq!(path, PathBuf::from("/data/audio/episode_42.m4a"));
    }

    #[test]
    fn test_part_path() {
        let source = Path::new("/data/audio/episode_42.mp3");
        assert_eq!(part_path(source, 0), PathBuf::from("/data/audio/episode_42_part0.mp3"));
        assert_eq!(part_path(source, 3), PathBuf::from("/data/audio/episode_42_part3.mp3"));
    }

    #[test]
    fn test_part_count() {
        assert_eq!(part_count(3599.0, 3600.0), 1);
        assert_eq!(part_count(3600.0, 3600.0), 1);
        assert_eq!(part_count(3601.0, 3600.0), 2);
        assert_eq!(part_count(9000.0, 3600.0), 3);
    }

    #[tokio::test]
    async fn test_remove_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("episode_1.mp3");
        std::fs::write(&source, b"x").unwrap();
        std::fs::write(part_path(&source, 0), b"x").unwrap();
        std::fs::write(part_path(&source, 1), b"x").unwrap();

        remove_audio_files(&source).await;

        assert!(!source.exists());
        assert!(!part_path(&source, 0).exists());
        assert!(!part_path(&source, 1).exists());
    }
}
