//! In-crate fakes for the model loader and the media source, shared by the
//! unit tests of every layer.

use crate::config::AppConfig;
use crate::media::{AcquisitionError, FetchedAudio, MediaSource};
use crate::transcription::{
    CancellationSignal, ModelLoader, ModelSize, Segment, SpeechModel, TranscriptionResult,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration rooted in a temporary directory, with a 1 MB upload limit.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.uploads_dir = root.join("uploads");
    config.storage.transcripts_dir = root.join("transcripts");
    config.storage.max_upload_mb = 1;
    config.tools.yt_dlp_path = "definitely-not-yt-dlp".to_string();
    config.tools.ffmpeg_path = "definitely-not-ffmpeg".to_string();
    config
}

#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Succeed(String),
    Fail(String),
    /// Raises the cancellation signal itself, then returns a result.
    CancelItself,
    /// Spins until someone else raises the signal.
    WaitForCancel,
}

impl FakeBehavior {
    pub fn succeed(text: &str) -> Self {
        FakeBehavior::Succeed(text.to_string())
    }

    pub fn fail(message: &str) -> Self {
        FakeBehavior::Fail(message.to_string())
    }
}

#[derive(Default)]
struct Counters {
    loads: AtomicUsize,
    transcribes: AtomicUsize,
    last_size: Mutex<Option<ModelSize>>,
}

pub struct FakeLoader {
    behavior: FakeBehavior,
    load_error: Option<String>,
    counters: Arc<Counters>,
}

impl FakeLoader {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            load_error: None,
            counters: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            load_error: Some(message.to_string()),
            ..Self::new(FakeBehavior::succeed(""))
        }
    }

    pub fn loads(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub fn transcribes(&self) -> usize {
        self.counters.transcribes.load(Ordering::SeqCst)
    }

    /// Size of the model used by the most recent transcription.
    pub fn last_size(&self) -> Option<ModelSize> {
        *self.counters.last_size.lock().unwrap()
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self, size: ModelSize) -> Result<Box<dyn SpeechModel>> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.load_error {
            return Err(anyhow!("{}", message));
        }
        Ok(Box::new(FakeModel {
            size,
            behavior: self.behavior.clone(),
            counters: self.counters.clone(),
        }))
    }
}

struct FakeModel {
    size: ModelSize,
    behavior: FakeBehavior,
    counters: Arc<Counters>,
}

impl SpeechModel for FakeModel {
    fn size(&self) -> ModelSize {
        self.size
    }

    fn transcribe(
        &mut self,
        _audio_path: &Path,
        cancel: &CancellationSignal,
    ) -> Result<TranscriptionResult> {
        self.counters.transcribes.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_size.lock().unwrap() = Some(self.size);

        match &self.behavior {
            FakeBehavior::Succeed(text) => Ok(fake_result(text)),
            FakeBehavior::Fail(message) => bail!("{}", message),
            FakeBehavior::CancelItself => {
                cancel.request();
                Ok(fake_result("too late"))
            }
            FakeBehavior::WaitForCancel => {
                for _ in 0..500 {
                    if cancel.is_requested() {
                        bail!("stopped at window boundary");
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                bail!("cancellation never arrived")
            }
        }
    }
}

fn fake_result(text: &str) -> TranscriptionResult {
    TranscriptionResult {
        text: text.to_string(),
        segments: vec![Segment {
            id: 0,
            start: 0.0,
            end: 1.5,
            text: text.to_string(),
        }],
        language: "en".to_string(),
    }
}

pub struct FakeMediaSource {
    outcome: Result<String, AcquisitionError>,
    fetches: AtomicUsize,
    last_scratch: Mutex<Option<PathBuf>>,
}

impl FakeMediaSource {
    /// Succeeds with an mp3 written into the scratch directory.
    pub fn titled(title: &str) -> Self {
        Self {
            outcome: Ok(title.to_string()),
            fetches: AtomicUsize::new(0),
            last_scratch: Mutex::new(None),
        }
    }

    pub fn failing(error: AcquisitionError) -> Self {
        Self {
            outcome: Err(error),
            ..Self::titled("")
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn last_scratch(&self) -> Option<PathBuf> {
        self.last_scratch.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn fetch_audio(
        &self,
        _url: &str,
        scratch_dir: &Path,
    ) -> Result<FetchedAudio, AcquisitionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_scratch.lock().unwrap() = Some(scratch_dir.to_path_buf());

        let title = self.outcome.clone()?;
        let path = scratch_dir.join("audio.mp3");
        std::fs::write(&path, b"ID3 fake")
            .map_err(|e| AcquisitionError::DownloadFailed(e.to_string()))?;
        Ok(FetchedAudio { path, title })
    }

    async fn is_available(&self) -> bool {
        self.outcome.is_ok()
    }
}
