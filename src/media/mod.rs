//! # Media Acquisition
//!
//! Fetching the audio track of a remote video into a scratch directory.
//! The scratch directory belongs to the caller, which removes it afterwards.

pub mod youtube;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub use youtube::YtDlpSource;

/// Why a download failed, as far as the downloader's output tells us.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("YouTube access forbidden. This video may be restricted or require sign-in. Try a different video or check if the URL is correct.")]
    AccessForbidden,

    #[error("This YouTube video is unavailable or private. Please try a different video.")]
    Unavailable,

    #[error("{0}")]
    MissingTool(String),

    #[error("YouTube download failed: {0}")]
    DownloadFailed(String),
}

impl AcquisitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::AccessForbidden => "access_forbidden",
            AcquisitionError::Unavailable => "unavailable",
            AcquisitionError::MissingTool(_) => "missing_tool",
            AcquisitionError::DownloadFailed(_) => "download_failed",
        }
    }
}

/// Downloaded audio and the title reported by the source.
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub title: String,
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Download the best available audio for `url` into `scratch_dir`.
    async fn fetch_audio(
        &self,
        url: &str,
        scratch_dir: &Path,
    ) -> Result<FetchedAudio, AcquisitionError>;

    /// Whether the downloader can be run at all.
    async fn is_available(&self) -> bool;
}

/// Accept only absolute http(s) URLs.
pub fn validate_url(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url.trim()).map_err(|_| format!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("URL must use HTTP or HTTPS protocol".to_string());
    }

    if parsed.host_str().is_none() {
        return Err(format!("URL has no host: {}", url));
    }

    Ok(parsed)
}
