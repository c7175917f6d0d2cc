//! Transcription endpoints: `POST /transcribe_youtube` and `POST /transcribe_file`.

use crate::error::{AppError, AppResult};
use crate::service::WorkingFile;
use crate::state::{AppState, JobOutcome};
use crate::transcription::ModelSize;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;

/// Longest accepted value for a plain form field such as `model_size`.
const MAX_FIELD_BYTES: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct YoutubeRequest {
    pub url: Option<String>,
    pub model_size: Option<String>,
}

/// Transcribe the audio track of a YouTube (or other yt-dlp supported) URL.
///
/// ## Request:
/// ```json
/// { "url": "https://www.youtube.com/watch?v=...", "model_size": "base" }
/// ```
///
/// ## Response:
/// ```json
/// { "success": true, "transcript": "...", "language": "en",
///   "title": "...", "transcript_file": "Title_20250101_120000.json" }
/// ```
pub async fn transcribe_youtube(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let request: YoutubeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        YoutubeRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let outcome = state
        .service
        .transcribe_url(request.url.as_deref(), request.model_size.as_deref())
        .await;
    let outcome = track_job(&state, outcome)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "transcript": outcome.text,
        "language": outcome.language,
        "title": outcome.title,
        "transcript_file": outcome.record_id,
    })))
}

/// Transcribe an uploaded audio/video file.
///
/// ## Request:
/// `multipart/form-data` with a `file` part and an optional `model_size` part.
/// The file is streamed to disk, so the size ceiling applies as it arrives.
/// `model_size` is checked as soon as its part is read.
pub async fn transcribe_file(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let mut upload: Option<WorkingFile> = None;
    let mut model_size: Option<ModelSize> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or_default()
                    .to_string();

                let mut working = state.service.begin_upload(&filename).await?;
                while let Some(chunk) = field.next().await {
                    let chunk =
                        chunk.map_err(|e| AppError::Validation(format!("Upload error: {}", e)))?;
                    working.write_chunk(&chunk).await?;
                }
                upload = Some(working);
            }
            "model_size" => {
                let mut value = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk =
                        chunk.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;
                    if value.len() + chunk.len() > MAX_FIELD_BYTES {
                        return Err(AppError::Validation("model_size is too long".to_string()));
                    }
                    value.extend_from_slice(&chunk);
                }
                let value = String::from_utf8_lossy(&value);
                model_size = Some(state.service.resolve_model(Some(&*value))?);
            }
            _ => {
                // Drain parts we don't use.
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;
                }
            }
        }
    }

    let upload = upload.ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;

    let outcome = state
        .service
        .transcribe_upload(
            upload,
            model_size.unwrap_or_else(|| state.service.default_model()),
        )
        .await;
    let outcome = track_job(&state, outcome)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "transcript": outcome.text,
        "language": outcome.language,
        "filename": outcome.filename,
        "transcript_file": outcome.record_id,
    })))
}

/// Count finished jobs and log failures at the request boundary.
fn track_job<T>(state: &AppState, outcome: AppResult<T>) -> AppResult<T> {
    match &outcome {
        Ok(_) => state.record_job(JobOutcome::Completed),
        Err(AppError::Cancelled) => {
            tracing::info!("Transcription cancelled");
            state.record_job(JobOutcome::Cancelled);
        }
        Err(AppError::Validation(msg)) => {
            tracing::debug!(error = %msg, "Rejected transcription request");
        }
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "Transcription failed");
            state.record_job(JobOutcome::Failed);
        }
    }
    outcome
}
