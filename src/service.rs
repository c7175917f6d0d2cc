//! # Transcription Service
//!
//! The orchestration layer behind the HTTP handlers. It owns the engine
//! (model cache, cancellation signal, job admission), the transcript store,
//! the media source and the uploads directory.
//!
//! ## Operations:
//! - **transcribe_url**: validate → download into a scratch dir → transcribe → persist
//! - **begin_upload / transcribe_upload**: validate the name → stream to disk → transcribe → persist
//! - **cancel**: raise the cancellation signal
//! - **export**: render a stored transcript
//!
//! Temporary files (scratch directories, working uploads) are removed on
//! every exit path by their guards.

use crate::audio;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::media::{self, MediaSource};
use crate::store::{sanitize_filename, Export, ExportFormat, SourceMetadata, TranscriptStore};
use crate::transcription::{ModelLoader, ModelSize, TranscriptionEngine};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Upload extensions accepted by [`TranscriptionService::begin_upload`].
pub const SUPPORTED_EXTENSIONS: [&str; 8] = ["mp3", "mp4", "wav", "flac", "m4a", "ogg", "wma", "aac"];

#[derive(Debug, Clone, Serialize)]
pub struct UrlTranscription {
    pub text: String,
    pub language: String,
    pub title: String,
    pub record_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTranscription {
    pub text: String,
    pub language: String,
    pub filename: String,
    pub record_id: String,
}

pub struct TranscriptionService {
    engine: TranscriptionEngine,
    store: TranscriptStore,
    media: Arc<dyn MediaSource>,
    uploads_dir: PathBuf,
    default_model: ModelSize,
    max_upload_bytes: u64,
    ffmpeg_path: String,
}

impl TranscriptionService {
    /// Build the service and create the uploads and transcripts directories.
    pub fn new(
        config: &AppConfig,
        loader: Arc<dyn ModelLoader>,
        media: Arc<dyn MediaSource>,
    ) -> AppResult<Self> {
        std::fs::create_dir_all(&config.storage.uploads_dir)?;
        let store = TranscriptStore::open(&config.storage.transcripts_dir)?;
        tracing::info!(
            uploads = %config.storage.uploads_dir.display(),
            transcripts = %store.dir().display(),
            "Storage directories ready"
        );

        Ok(Self {
            engine: TranscriptionEngine::new(loader, config.performance.max_concurrent_jobs),
            store,
            media,
            uploads_dir: config.storage.uploads_dir.clone(),
            default_model: config.models.default_model,
            max_upload_bytes: config.max_upload_bytes(),
            ffmpeg_path: config.tools.ffmpeg_path.clone(),
        })
    }

    pub fn engine(&self) -> &TranscriptionEngine {
        &self.engine
    }

    pub fn default_model(&self) -> ModelSize {
        self.default_model
    }

    /// Parse an optional model name, falling back to the configured default.
    pub fn resolve_model(&self, name: Option<&str>) -> AppResult<ModelSize> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => Ok(self.default_model),
            Some(name) => name.parse().map_err(|_| {
                let supported: Vec<&str> = ModelSize::ALL.iter().map(|m| m.as_str()).collect();
                AppError::Validation(format!(
                    "Unknown model size '{}'. Supported: {}",
                    name,
                    supported.join(", ")
                ))
            }),
        }
    }

    /// Download, transcribe and persist the audio behind a URL.
    pub async fn transcribe_url(
        &self,
        url: Option<&str>,
        model: Option<&str>,
    ) -> AppResult<UrlTranscription> {
        let url = url.map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(AppError::Validation("YouTube URL is required".to_string()));
        }
        media::validate_url(url).map_err(AppError::Validation)?;
        let size = self.resolve_model(model)?;

        tracing::info!(url = %url, model = %size, "Transcribing from URL");

        // Removed when this function returns.
        let scratch = tempfile::Builder::new().prefix("transcribe-").tempdir()?;

        let fetched = self.media.fetch_audio(url, scratch.path()).await?;
        let result = self.engine.transcribe(&fetched.path, size).await?;

        let base_name = if sanitize_filename(&fetched.title).is_empty() {
            "youtube_video"
        } else {
            fetched.title.as_str()
        };
        let source = SourceMetadata::Youtube {
            url: url.to_string(),
            title: fetched.title.clone(),
        };
        let record_id = self.store.persist(&result, source, size, base_name)?;

        Ok(UrlTranscription {
            text: result.text,
            language: result.language,
            title: fetched.title,
            record_id,
        })
    }

    /// Validate an upload's name and open its working file.
    ///
    /// Nothing is written to disk unless the name passes validation.
    pub async fn begin_upload(&self, filename: &str) -> AppResult<WorkingFile> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(AppError::Validation("No file selected".to_string()));
        }

        let extension = supported_extension(filename).ok_or_else(|| {
            AppError::Validation(format!(
                "File type not supported. Supported formats: {}",
                SUPPORTED_EXTENSIONS.join(", ")
            ))
        })?;

        let mut safe_name = sanitize_filename(filename);
        if supported_extension(&safe_name).is_none() {
            safe_name = format!("upload.{}", extension);
        }

        WorkingFile::create(&self.uploads_dir, safe_name, self.max_upload_bytes).await
    }

    /// Transcribe a fully received upload with an already resolved model.
    /// The working file is removed whatever the outcome.
    pub async fn transcribe_upload(
        &self,
        mut upload: WorkingFile,
        size: ModelSize,
    ) -> AppResult<FileTranscription> {
        upload.finish().await?;

        tracing::info!(
            filename = %upload.filename(),
            bytes = upload.bytes_written(),
            model = %size,
            "Transcribing uploaded file"
        );

        let result = self.engine.transcribe(upload.path(), size).await?;

        let filename = upload.filename().to_string();
        let base_name = Path::new(&filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("upload")
            .to_string();
        let source = SourceMetadata::File {
            filename: filename.clone(),
        };
        let record_id = self.store.persist(&result, source, size, &base_name)?;

        Ok(FileTranscription {
            text: result.text,
            language: result.language,
            filename,
            record_id,
        })
    }

    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.engine.cancel();
    }

    pub fn export(&self, record_id: &str, format: &str) -> AppResult<Export> {
        Ok(self.store.export(record_id, ExportFormat::parse(format))?)
    }

    pub async fn youtube_available(&self) -> bool {
        self.media.is_available().await
    }

    pub async fn ffmpeg_available(&self) -> bool {
        let ffmpeg_path = self.ffmpeg_path.clone();
        tokio::task::spawn_blocking(move || audio::ffmpeg_available(&ffmpeg_path))
            .await
            .unwrap_or(false)
    }
}

/// Lower-cased extension after the last dot, if it is on the allow-list.
fn supported_extension(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    let extension = extension.to_lowercase();
    SUPPORTED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

/// An upload being written to the uploads directory.
///
/// The file is deleted when this value is dropped.
pub struct WorkingFile {
    path: PathBuf,
    filename: String,
    file: Option<File>,
    written: u64,
    limit: u64,
}

impl WorkingFile {
    async fn create(dir: &Path, filename: String, limit: u64) -> AppResult<Self> {
        let (stem, extension) = filename
            .rsplit_once('.')
            .map(|(s, e)| (s.to_string(), e.to_string()))
            .unwrap_or_else(|| (filename.clone(), String::new()));

        // Concurrent uploads with the same name get their own working file.
        for attempt in 1..=100 {
            let name = if attempt == 1 {
                filename.clone()
            } else {
                format!("{}_{}.{}", stem, attempt, extension)
            };
            let path = dir.join(&name);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "Receiving upload");
                    return Ok(Self {
                        path,
                        filename,
                        file: Some(file),
                        written: 0,
                        limit,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "Could not create a working file for {}",
            filename
        )))
    }

    /// Append a chunk, enforcing the upload size ceiling.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> AppResult<()> {
        let new_size = self.written + chunk.len() as u64;
        if new_size > self.limit {
            return Err(AppError::Validation(format!(
                "File too large. Maximum size is {} MB",
                self.limit / (1024 * 1024)
            )));
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AppError::Internal("upload already finished".to_string()))?;
        file.write_all(chunk).await?;
        self.written = new_size;
        Ok(())
    }

    /// Flush and close the file. Further writes fail.
    pub async fn finish(&mut self) -> AppResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sanitized client file name.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Drop for WorkingFile {
    fn drop(&mut self) {
        self.file.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed working upload"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove working upload"),
        }
    }
}
