//! yt-dlp backed [`MediaSource`].
//!
//! Two invocations per URL: `--dump-json` for the title, then the actual
//! download with mp3 extraction. Failures are classified from yt-dlp's stderr.

use super::{AcquisitionError, FetchedAudio, MediaSource};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub struct YtDlpSource {
    yt_dlp_path: String,
    ffmpeg_path: String,
}

impl YtDlpSource {
    pub fn new(yt_dlp_path: impl Into<String>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<Output, AcquisitionError> {
        Command::new(&self.yt_dlp_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => AcquisitionError::MissingTool(format!(
                    "yt-dlp is required for YouTube downloads but was not found at '{}'. Install it with: pip install yt-dlp",
                    self.yt_dlp_path
                )),
                _ => AcquisitionError::DownloadFailed(format!("could not run yt-dlp: {}", e)),
            })
    }

    async fn fetch_title(&self, url: &str) -> Result<String, AcquisitionError> {
        tracing::debug!(url = %url, "Extracting video info");

        let args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--user-agent".to_string(),
            USER_AGENT.to_string(),
            url.to_string(),
        ];
        let output = self.run(&args).await?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let info: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            AcquisitionError::DownloadFailed(format!("unreadable video info: {}", e))
        })?;

        Ok(info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string())
    }

    fn download_args(&self, url: &str, scratch_dir: &Path) -> Vec<String> {
        let template = scratch_dir.join("%(title)s.%(ext)s");
        let mut args: Vec<String> = [
            "-f",
            "bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "192K",
            "--user-agent",
            USER_AGENT,
            "--extractor-retries",
            "3",
            "--fragment-retries",
            "3",
            "--skip-unavailable-fragments",
            "--sleep-interval",
            "1",
            "--max-sleep-interval",
            "5",
            "--no-playlist",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.ffmpeg_path != "ffmpeg" {
            args.push("--ffmpeg-location".to_string());
            args.push(self.ffmpeg_path.clone());
        }

        args.push("-o".to_string());
        args.push(template.to_string_lossy().into_owned());
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn fetch_audio(
        &self,
        url: &str,
        scratch_dir: &Path,
    ) -> Result<FetchedAudio, AcquisitionError> {
        let title = self.fetch_title(url).await?;
        tracing::info!(url = %url, title = %title, "Downloading audio");

        let output = self.run(&self.download_args(url, scratch_dir)).await?;
        if !output.status.success() {
            let err = classify_failure(&String::from_utf8_lossy(&output.stderr));
            tracing::warn!(url = %url, error = %err, "yt-dlp download failed");
            return Err(err);
        }

        let path = first_mp3(scratch_dir).await.ok_or_else(|| {
            AcquisitionError::DownloadFailed("yt-dlp finished but produced no mp3 file".to_string())
        })?;

        tracing::debug!(path = %path.display(), "Audio downloaded");
        Ok(FetchedAudio { path, title })
    }

    async fn is_available(&self) -> bool {
        self.run(&["--version".to_string()])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

async fn first_mp3(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_mp3 = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("mp3"))
            .unwrap_or(false);
        if is_mp3 {
            return Some(path);
        }
    }
    None
}

/// Map yt-dlp's stderr to an [`AcquisitionError`]. Checks run in order.
pub fn classify_failure(stderr: &str) -> AcquisitionError {
    let lower = stderr.to_lowercase();

    if stderr.contains("403") || stderr.contains("Forbidden") || lower.contains("sign in") {
        AcquisitionError::AccessForbidden
    } else if lower.contains("unavailable") || lower.contains("private video") {
        AcquisitionError::Unavailable
    } else if lower.contains("ffmpeg") || lower.contains("ffprobe") {
        AcquisitionError::MissingTool(
            "FFmpeg is required for YouTube downloads but not found. Install FFmpeg and make sure it is on PATH or set tools.ffmpeg_path.".to_string(),
        )
    } else {
        let message = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("unknown error")
            .trim()
            .to_string();
        AcquisitionError::DownloadFailed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            AcquisitionError::AccessForbidden
        );
        assert_eq!(
            classify_failure("ERROR: Sign in to confirm you're not a bot"),
            AcquisitionError::AccessForbidden
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            AcquisitionError::Unavailable
        );
        assert_eq!(
            classify_failure("ERROR: Private video"),
            AcquisitionError::Unavailable
        );
        assert!(matches!(
            classify_failure("ERROR: Postprocessing: ffprobe and ffmpeg not found"),
            AcquisitionError::MissingTool(_)
        ));
        assert_eq!(
            classify_failure("WARNING: retrying\nERROR: HTTP Error 500\n"),
            AcquisitionError::DownloadFailed("ERROR: HTTP Error 500".to_string())
        );
    }

    #[test]
    fn test_forbidden_wins_over_unavailable() {
        assert_eq!(
            classify_failure("HTTP Error 403: Forbidden (fragment unavailable)"),
            AcquisitionError::AccessForbidden
        );
    }

    #[test]
    fn test_download_args() {
        let source = YtDlpSource::new("yt-dlp", "/opt/ffmpeg/bin/ffmpeg");
        let args = source.download_args("https://example.com/v", Path::new("/tmp/scratch"));

        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
        assert!(args.iter().any(|a| a == "/tmp/scratch/%(title)s.%(ext)s"));
        assert!(args.windows(2).any(|w| w[0] == "--ffmpeg-location" && w[1] == "/opt/ffmpeg/bin/ffmpeg"));

        let default_source = YtDlpSource::new("yt-dlp", "ffmpeg");
        let args = default_source.download_args("https://example.com/v", Path::new("/tmp/s"));
        assert!(!args.iter().any(|a| a == "--ffmpeg-location"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let source = YtDlpSource::new("definitely-not-yt-dlp", "ffmpeg");
        assert!(!source.is_available().await);

        let scratch = tempfile::tempdir().unwrap();
        let err = source
            .fetch_audio("https://example.com/v", scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::MissingTool(ref msg) if msg.contains("yt-dlp")));
    }

    #[tokio::test]
    async fn test_first_mp3() {
        let scratch = tempfile::tempdir().unwrap();
        assert!(first_mp3(scratch.path()).await.is_none());

        std::fs::write(scratch.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(scratch.path().join("Talk.mp3"), b"x").unwrap();
        let found = first_mp3(scratch.path()).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "Talk.mp3");
    }
}
