//! # Model Cache
//!
//! Holds at most one loaded model. Asking for a different size drops the
//! current model before the new one is loaded, so two checkpoints never sit in
//! memory together (running jobs keep their own handle until they finish).

use crate::transcription::model::{ModelLoader, ModelSize, SpeechModel};
use anyhow::Result;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Shared handle to a loaded model. Inference needs `&mut`, so jobs lock it
/// from their blocking thread.
pub type ModelHandle = Arc<Mutex<Box<dyn SpeechModel>>>;

pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    /// Serialises loads; held for the whole download/initialisation.
    slot: tokio::sync::Mutex<Option<(ModelSize, ModelHandle)>>,
    /// Readable while a load is in progress.
    loaded: RwLock<Option<ModelSize>>,
    last_error: RwLock<Option<String>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slot: tokio::sync::Mutex::new(None),
            loaded: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Return the cached model if it matches `size`, otherwise load it.
    pub async fn get_model(&self, size: ModelSize) -> Result<ModelHandle> {
        let mut slot = self.slot.lock().await;

        if let Some((loaded_size, handle)) = slot.as_ref() {
            if *loaded_size == size {
                return Ok(handle.clone());
            }
            tracing::info!(from = %loaded_size, to = %size, "Switching Whisper model");
        }

        // Release the previous model before loading the next.
        *slot = None;
        *self.loaded.write().unwrap_or_else(|e| e.into_inner()) = None;

        let start_time = Instant::now();
        match self.loader.load(size).await {
            Ok(model) => {
                let handle: ModelHandle = Arc::new(Mutex::new(model));
                *slot = Some((size, handle.clone()));
                *self.loaded.write().unwrap_or_else(|e| e.into_inner()) = Some(size);
                *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = None;
                tracing::info!(
                    model = %size,
                    elapsed_s = format!("{:.2}", start_time.elapsed().as_secs_f64()),
                    "Model ready"
                );
                Ok(handle)
            }
            Err(e) => {
                tracing::error!(model = %size, error = %e, "Model load failed");
                *self.last_error.write().unwrap_or_else(|e| e.into_inner()) =
                    Some(format!("{}: {:#}", size, e));
                Err(e)
            }
        }
    }

    pub fn loaded_size(&self) -> Option<ModelSize> {
        *self.loaded.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Message of the most recent failed load, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBehavior, FakeLoader};

    #[tokio::test]
    async fn test_same_size_is_loaded_once() {
        let loader = Arc::new(FakeLoader::new(FakeBehavior::succeed("hello")));
        let cache = ModelCache::new(loader.clone());

        cache.get_model(ModelSize::Tiny).await.unwrap();
        cache.get_model(ModelSize::Tiny).await.unwrap();

        assert_eq!(loader.loads(), 1);
        assert_eq!(cache.loaded_size(), Some(ModelSize::Tiny));
    }

    #[tokio::test]
    async fn test_switching_size_replaces_model() {
        let loader = Arc::new(FakeLoader::new(FakeBehavior::succeed("hello")));
        let cache = ModelCache::new(loader.clone());

        let tiny = cache.get_model(ModelSize::Tiny).await.unwrap();
        let small = cache.get_model(ModelSize::Small).await.unwrap();

        assert_eq!(loader.loads(), 2);
        assert_eq!(cache.loaded_size(), Some(ModelSize::Small));
        assert_eq!(small.lock().unwrap().size(), ModelSize::Small);
        // The cache no longer references the old model.
        assert_eq!(Arc::strong_count(&tiny), 1);
    }

    #[tokio::test]
    async fn test_load_failure_is_recorded_then_cleared() {
        let failing = Arc::new(FakeLoader::failing("no network"));
        let cache = ModelCache::new(failing);

        assert!(cache.get_model(ModelSize::Base).await.is_err());
        assert_eq!(cache.loaded_size(), None);
        assert!(cache.last_error().unwrap().contains("no network"));

        let loader = Arc::new(FakeLoader::new(FakeBehavior::succeed("ok")));
        let cache = ModelCache::new(loader);
        cache.get_model(ModelSize::Base).await.unwrap();
        assert!(cache.last_error().is_none());
    }
}
