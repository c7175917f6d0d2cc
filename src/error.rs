//! # Error Handling
//!
//! Application-level error type and its conversion into HTTP responses.
//!
//! Component errors (`AcquisitionError`, `JobError`, `StoreError`) are plain
//! `thiserror` enums that know nothing about HTTP. They convert into
//! [`AppError`] with `?`, and `AppError` decides the status code and body.
//!
//! ## JSON Error Body:
//! ```json
//! {
//!   "error": "YouTube URL is required",
//!   "kind": "validation_error",
//!   "timestamp": "2025-01-01T12:00:00+00:00"
//! }
//! ```
//!
//! ## Status Mapping:
//! - Validation → 400
//! - Acquisition: forbidden / download failed → 502, unavailable → 422, missing tool → 503
//! - Inference / Internal → 500
//! - Cancelled / ModelLoad → 503
//! - NotFound → 404

use crate::media::AcquisitionError;
use crate::store::StoreError;
use crate::transcription::JobError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Client input was missing or invalid
    Validation(String),

    /// The media downloader failed
    Acquisition(AcquisitionError),

    /// The model ran but failed
    Inference(String),

    /// The job was cancelled by a cancel request
    Cancelled,

    /// The requested model could not be loaded
    ModelLoad(String),

    /// Requested transcript does not exist
    NotFound(String),

    /// Filesystem, serialization and other server-side failures
    Internal(String),
}

impl AppError {
    /// Machine-readable kind used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Acquisition(err) => err.kind(),
            AppError::Inference(_) => "inference_error",
            AppError::Cancelled => "cancelled",
            AppError::ModelLoad(_) => "model_load_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Human-readable message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Inference(msg)
            | AppError::ModelLoad(msg)
            | AppError::NotFound(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Acquisition(err) => err.to_string(),
            AppError::Cancelled => "Transcription cancelled by user".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Acquisition(err) => write!(f, "Acquisition error: {}", err),
            AppError::Inference(msg) => write!(f, "Inference error: {}", msg),
            AppError::Cancelled => write!(f, "Transcription cancelled by user"),
            AppError::ModelLoad(msg) => write!(f, "Model load error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Acquisition(err) => match err {
                AcquisitionError::AccessForbidden => StatusCode::BAD_GATEWAY,
                AcquisitionError::Unavailable => StatusCode::UNPROCESSABLE_ENTITY,
                AcquisitionError::MissingTool(_) => StatusCode::SERVICE_UNAVAILABLE,
                AcquisitionError::DownloadFailed(_) => StatusCode::BAD_GATEWAY,
            },
            AppError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.message(),
            "kind": self.kind(),
            "timestamp": chrono::Local::now().to_rfc3339(),
        }))
    }
}

impl From<AcquisitionError> for AppError {
    fn from(err: AcquisitionError) -> Self {
        AppError::Acquisition(err)
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Cancelled => AppError::Cancelled,
            JobError::ModelLoad(msg) => AppError::ModelLoad(msg),
            JobError::Inference(msg) => AppError::Inference(msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound("Transcript file not found".to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Request bodies that fail to parse are the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
