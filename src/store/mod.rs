//! # Transcript Store
//!
//! Persists transcription results as pretty-printed JSON records in the
//! transcripts directory and renders them back as json, txt or docx.
//!
//! ## Record identifiers:
//! `<sanitized base>_<YYYYMMDD_HHMMSS>.json`, widened with `_2`, `_3`, ... when
//! a record with the same name already exists. Files are created with
//! create-new semantics, so a record is never overwritten.

mod docx;

use crate::transcription::{ModelSize, TranscriptionResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transcript file not found: {0}")]
    NotFound(String),

    #[error("Transcript storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transcript serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to build document: {0}")]
    Document(#[from] zip::result::ZipError),
}

/// Where a transcript came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SourceMetadata {
    Youtube { url: String, title: String },
    File { filename: String },
}

/// A persisted transcript: the model output plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    #[serde(flatten)]
    pub result: TranscriptionResult,
    #[serde(flatten)]
    pub source: SourceMetadata,
    pub timestamp: DateTime<Local>,
    pub model_size: ModelSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Txt,
    Docx,
}

impl ExportFormat {
    /// Unrecognised formats fall back to JSON.
    pub fn parse(format: &str) -> Self {
        match format.trim().to_lowercase().as_str() {
            "txt" => ExportFormat::Txt,
            "docx" => ExportFormat::Docx,
            _ => ExportFormat::Json,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Txt => "text/plain; charset=utf-8",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

/// Rendered export ready to send as an attachment.
#[derive(Debug, Clone)]
pub struct Export {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    /// `<record base>.<ext>`
    pub filename: String,
}

pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a new record and return its identifier.
    pub fn persist(
        &self,
        result: &TranscriptionResult,
        source: SourceMetadata,
        model_size: ModelSize,
        base_name: &str,
    ) -> Result<String, StoreError> {
        let record = TranscriptRecord {
            result: result.clone(),
            source,
            timestamp: Local::now(),
            model_size,
        };
        self.persist_record(&record, base_name)
    }

    pub fn persist_record(
        &self,
        record: &TranscriptRecord,
        base_name: &str,
    ) -> Result<String, StoreError> {
        let mut base = sanitize_filename(base_name);
        if base.is_empty() {
            base = "transcript".to_string();
        }
        let stem = format!("{}_{}", base, record.timestamp.format("%Y%m%d_%H%M%S"));
        let json = serde_json::to_vec_pretty(record)?;

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let id = if attempt == 1 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, attempt)
            };

            let path = self.dir.join(&id);
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            write_or_remove(file, &path, &json)?;
            tracing::info!(record_id = %id, "Transcript saved");
            return Ok(id);
        }

        Err(StoreError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free record name for {}", stem),
        )))
    }

    /// Raw bytes of a stored record.
    pub fn load_bytes(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(id.to_string()),
            _ => StoreError::Io(e),
        })
    }

    #[cfg(test)]
    pub fn load(&self, id: &str) -> Result<TranscriptRecord, StoreError> {
        let bytes = self.load_bytes(id)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Render a stored record. Computed fresh on every call.
    pub fn export(&self, id: &str, format: ExportFormat) -> Result<Export, StoreError> {
        let raw = self.load_bytes(id)?;

        let bytes = match format {
            ExportFormat::Json => raw,
            ExportFormat::Txt => record_text(&raw)?.into_bytes(),
            ExportFormat::Docx => docx::build("Transcript", &record_text(&raw)?)?,
        };

        let base = id.strip_suffix(".json").unwrap_or(id);
        Ok(Export {
            bytes,
            format,
            filename: format!("{}.{}", base, format.extension()),
        })
    }

    /// Identifiers must be bare `.json` file names inside the store.
    fn resolve(&self, id: &str) -> Result<PathBuf, StoreError> {
        let is_plain_name = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\', '\0'])
            && Path::new(id).file_name().map(|n| n == id).unwrap_or(false);

        if !is_plain_name || !id.ends_with(".json") {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(self.dir.join(id))
    }
}

/// Fill a freshly created record file. A partial record is never left behind.
fn write_or_remove(mut file: impl Write, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Err(e) = file.write_all(bytes).and_then(|()| file.flush()) {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            tracing::warn!(
                path = %path.display(),
                error = %remove_err,
                "Failed to remove partially written record"
            );
        }
        return Err(e.into());
    }
    Ok(())
}

// Only the text field is needed, so tolerate records written by older versions.
fn record_text(raw: &[u8]) -> Result<String, StoreError> {
    #[derive(Deserialize)]
    struct TextOnly {
        text: String,
    }
    let record: TextOnly = serde_json::from_slice(raw)?;
    Ok(record.text)
}

/// Reduce a user supplied name to a safe ASCII file name.
///
/// Characters are NFKD-folded first so accented letters keep their base
/// letter (`é` → `e`). Path separators become spaces, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_.-]` is dropped and leading/trailing `.` and `_` are stripped.
/// May return an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let without_separators: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = without_separators
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}
