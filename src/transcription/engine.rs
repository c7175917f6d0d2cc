//! # Transcription Engine
//!
//! Runs transcription jobs against the cached model.
//!
//! ## Job lifecycle:
//! 1. Wait for an admission permit (`performance.max_concurrent_jobs`)
//! 2. Check the cancellation signal
//! 3. Fetch (or load) the requested model
//! 4. Check the signal again
//! 5. Run inference on a blocking worker thread
//! 6. If cancellation was requested at any point, discard the result
//!
//! The signal is cleared whenever a job ends, however it ends. The permit
//! travels with the inference work, so a dropped request does not free a slot
//! while its model is still running.

use crate::transcription::cache::ModelCache;
use crate::transcription::cancel::CancellationSignal;
use crate::transcription::model::{ModelLoader, ModelSize, TranscriptionResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Transcription cancelled by user")]
    Cancelled,

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Transcription failed: {0}")]
    Inference(String),
}

pub struct TranscriptionEngine {
    cache: ModelCache,
    cancel: CancellationSignal,
    permits: Arc<Semaphore>,
    max_jobs: usize,
}

impl TranscriptionEngine {
    pub fn new(loader: Arc<dyn ModelLoader>, max_concurrent_jobs: usize) -> Self {
        let max_jobs = max_concurrent_jobs.max(1);
        Self {
            cache: ModelCache::new(loader),
            cancel: CancellationSignal::new(),
            permits: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
        }
    }

    /// Transcribe one audio file with the given model size.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        size: ModelSize,
    ) -> Result<TranscriptionResult, JobError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::Inference("transcription engine is shut down".to_string()))?;
        let _clear = self.cancel.clear_on_drop();

        if self.cancel.is_requested() {
            tracing::info!("Job cancelled before start");
            return Err(JobError::Cancelled);
        }

        let handle = self
            .cache
            .get_model(size)
            .await
            .map_err(|e| JobError::ModelLoad(format!("{:#}", e)))?;

        if self.cancel.is_requested() {
            tracing::info!("Job cancelled after model load");
            return Err(JobError::Cancelled);
        }

        let start_time = Instant::now();
        let path = audio_path.to_path_buf();
        let cancel = self.cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut model = handle.lock().unwrap_or_else(|e| e.into_inner());
            model.transcribe(&path, &cancel)
        })
        .await;

        if self.cancel.is_requested() {
            tracing::info!(
                elapsed_s = format!("{:.2}", start_time.elapsed().as_secs_f64()),
                "Job cancelled during inference, result discarded"
            );
            return Err(JobError::Cancelled);
        }

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(JobError::Inference(format!("{:#}", e))),
            Err(join_error) => Err(JobError::Inference(format!(
                "inference worker failed: {}",
                join_error
            ))),
        }
    }

    /// Ask the running job (or the next one) to stop.
    pub fn cancel(&self) {
        self.cancel.request();
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    /// Load `size` without transcribing anything. Used by preload and `/health`.
    pub async fn ensure_loaded(&self, size: ModelSize) -> Result<(), JobError> {
        self.cache
            .get_model(size)
            .await
            .map(|_| ())
            .map_err(|e| JobError::ModelLoad(format!("{:#}", e)))
    }

    pub fn loaded_model(&self) -> Option<ModelSize> {
        self.cache.loaded_size()
    }

    pub fn last_load_error(&self) -> Option<String> {
        self.cache.last_error()
    }

    pub fn active_jobs(&self) -> usize {
        self.max_jobs - self.permits.available_permits()
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }
}
