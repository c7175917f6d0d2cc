//! # Whisper Model (Candle)
//!
//! Production [`SpeechModel`]: OpenAI Whisper checkpoints from the Hugging
//! Face hub, run with candle-transformers.
//!
//! ## Pipeline:
//! 1. Decode the input file to 16 kHz mono PCM (ffmpeg)
//! 2. Log-mel spectrogram (Slaney mel filter bank, computed at load time)
//! 3. Language detection on the first window
//! 4. Greedy decoding in 30 second windows, one [`Segment`] per window
//!
//! The cancellation signal is polled between windows.

use crate::audio;
use crate::device::{self, DevicePreference};
use crate::transcription::cancel::CancellationSignal;
use crate::transcription::model::{
    ModelLoader, ModelSize, Segment, SpeechModel, TranscriptionResult,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio as whisper_audio, Config};
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Language codes in the order Whisper's tokenizer defines them.
const LANGUAGES: [&str; 99] = [
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su",
];

/// Token ids the decoder needs on every window.
struct SpecialTokens {
    sot: u32,
    transcribe: u32,
    eot: u32,
    no_timestamps: u32,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        Ok(Self {
            sot: token_id(tokenizer, m::SOT_TOKEN)?,
            transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
            eot: token_id(tokenizer, m::EOT_TOKEN)?,
            no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
        })
    }
}

/// A loaded Whisper model ready for transcription.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    /// 0 for allowed tokens, -inf for the ones the checkpoint suppresses
    suppress_tokens: Tensor,
    mel_filters: Vec<f32>,
    size: ModelSize,
    ffmpeg_path: String,
}

impl WhisperModel {
    /// Download (or reuse the hub cache) and initialise a checkpoint.
    ///
    /// ## Environment:
    /// - `HF_TOKEN`: optional hub token
    /// - `HF_HUB_CACHE` / `HF_HOME`: cache location overrides
    pub async fn load(size: ModelSize, device: Device, ffmpeg_path: String) -> Result<Self> {
        tracing::info!(model = %size, repo = size.repo_name(), device = device::describe(&device), "Loading Whisper model");
        let start_time = Instant::now();

        let api = hub_api()?;
        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let weights_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&config_filename)?)?;
        tracing::debug!(mel_bins = config.num_mel_bins, vocab = config.vocab_size, "Model config loaded");

        let tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::resolve(&tokenizer)?;

        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|i| {
                if config.suppress_tokens.contains(&i) {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress.as_slice(), &device)?;

        let mel_filters = mel_filter_bank(config.num_mel_bins, m::N_FFT, m::SAMPLE_RATE);

        // Safety: the hub cache file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            model = %size,
            elapsed_s = format!("{:.2}", start_time.elapsed().as_secs_f64()),
            "Whisper model loaded"
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            tokens,
            suppress_tokens,
            mel_filters,
            size,
            ffmpeg_path,
        })
    }

    /// Pick the most likely language from the first window of audio.
    fn detect_language(&mut self, mel: &Tensor) -> Result<String> {
        let candidates: Vec<(&str, u32)> = LANGUAGES
            .iter()
            .filter_map(|code| {
                self.tokenizer
                    .token_to_id(&format!("<|{code}|>"))
                    .map(|id| (*code, id))
            })
            .collect();

        // English-only checkpoints have no language tokens.
        if candidates.is_empty() {
            return Ok("en".to_string());
        }

        let (_, _, frames) = mel.dims3()?;
        let mel = mel.narrow(2, 0, usize::min(frames, self.config.max_source_positions))?;
        let audio_features = self.model.encoder.forward(&mel, true)?;

        let tokens = Tensor::new(&[[self.tokens.sot]], &self.device)?;
        let ids: Vec<u32> = candidates.iter().map(|(_, id)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;

        let ys = self.model.decoder.forward(&tokens, &audio_features, true)?;
        let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
        let logits = logits.index_select(&ids, 0)?;
        let probs: Vec<f32> = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1()?;

        let best = argmax(&probs) as usize;
        Ok(candidates[best].0.to_string())
    }

    /// Greedy decode of one window of at most 30 seconds.
    fn decode_window(&mut self, mel: &Tensor, language_token: Option<u32>) -> Result<String> {
        let audio_features = self.model.encoder.forward(mel, true)?;

        let mut tokens = vec![self.tokens.sot];
        if let Some(language_token) = language_token {
            tokens.push(language_token);
        }
        tokens.push(self.tokens.transcribe);
        tokens.push(self.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let sample_len = self.config.max_target_positions / 2;
        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits: Vec<f32> = logits.broadcast_add(&self.suppress_tokens)?.to_vec1()?;

            let next_token = argmax(&logits);
            if next_token == self.tokens.eot || is_repetitive(&tokens[prompt_len..], next_token) {
                break;
            }

            tokens.push(next_token);
            if tokens.len() > self.config.max_target_positions {
                break;
            }
        }

        self.tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))
    }
}

impl SpeechModel for WhisperModel {
    fn size(&self) -> ModelSize {
        self.size
    }

    fn transcribe(
        &mut self,
        audio_path: &Path,
        cancel: &CancellationSignal,
    ) -> Result<TranscriptionResult> {
        let start_time = Instant::now();

        let pcm = audio::decode_to_pcm(&self.ffmpeg_path, audio_path)?;
        let audio_duration = audio::processor::duration_seconds(&pcm);

        let n_mels = self.config.num_mel_bins;
        let mel = whisper_audio::pcm_to_mel(&self.config, &pcm, &self.mel_filters);
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;

        // The spectrogram is zero padded past the end of the audio.
        let (_, _, total_frames) = mel.dims3()?;
        let content_frames = (pcm.len() / m::HOP_LENGTH).min(total_frames);

        let language = self.detect_language(&mel)?;
        let language_token = self.tokenizer.token_to_id(&format!("<|{language}|>"));
        tracing::debug!(language = %language, audio_s = format!("{:.1}", audio_duration), "Language detected");

        let mut segments = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            if cancel.is_requested() {
                bail!("transcription cancelled at {:.1}s", frames_to_seconds(seek));
            }

            let window = usize::min(total_frames - seek, m::N_FRAMES);
            let content = usize::min(content_frames - seek, m::N_FRAMES);
            let mel_window = mel.narrow(2, seek, window)?;

            let text = self.decode_window(&mel_window, language_token)?;
            let text = text.trim();
            if !text.is_empty() {
                segments.push(Segment {
                    id: segments.len(),
                    start: frames_to_seconds(seek),
                    end: frames_to_seconds(seek + content),
                    text: text.to_string(),
                });
            }

            seek += content;
        }

        let text = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::info!(
            model = %self.size,
            audio_s = format!("{:.1}", audio_duration),
            elapsed_s = format!("{:.2}", start_time.elapsed().as_secs_f64()),
            segments = segments.len(),
            "Transcription finished"
        );

        Ok(TranscriptionResult {
            text,
            segments,
            language,
        })
    }
}

/// [`ModelLoader`] producing [`WhisperModel`]s on the configured device.
pub struct WhisperLoader {
    device: DevicePreference,
    ffmpeg_path: String,
}

impl WhisperLoader {
    pub fn new(device: DevicePreference, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            device,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl ModelLoader for WhisperLoader {
    async fn load(&self, size: ModelSize) -> Result<Box<dyn SpeechModel>> {
        let device = device::select_device(self.device);
        let model = WhisperModel::load(size, device, self.ffmpeg_path.clone()).await?;
        Ok(Box::new(model))
    }
}

fn hub_api() -> Result<Api> {
    let mut builder = ApiBuilder::new().with_progress(false);

    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }

    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        builder = builder.with_cache_dir(PathBuf::from(cache_dir));
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to initialise Hugging Face client: {}", e))
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer has no id for {}", token))
}

fn frames_to_seconds(frames: usize) -> f64 {
    (frames * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64
}

fn argmax(values: &[f32]) -> u32 {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// Greedy decoding can lock into a loop; stop when the tail repeats.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() < 6 {
        return false;
    }

    if tokens[tokens.len() - 3..] == [new_token, new_token, new_token] {
        return true;
    }

    let last_3 = &tokens[tokens.len() - 3..];
    let prev_3 = &tokens[tokens.len() - 6..tokens.len() - 3];
    last_3 == prev_3
}

/// Slaney-style mel filter bank laid out as `[n_mels][n_fft / 2 + 1]`,
/// area-normalised per filter (the librosa defaults Whisper was trained with).
pub fn mel_filter_bank(n_mels: usize, n_fft: usize, sample_rate: usize) -> Vec<f32> {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let log_step = 6.4f64.ln() / 27.0;

    let hz_to_mel = |hz: f64| {
        if hz >= MIN_LOG_HZ {
            MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step
        } else {
            hz / F_SP
        }
    };
    let mel_to_hz = |mel: f64| {
        if mel >= MIN_LOG_MEL {
            MIN_LOG_HZ * (log_step * (mel - MIN_LOG_MEL)).exp()
        } else {
            mel * F_SP
        }
    };

    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for i in 0..n_mels {
        let (lower_edge, center, upper_edge) = (mel_points[i], mel_points[i + 1], mel_points[i + 2]);
        let enorm = 2.0 / (upper_edge - lower_edge);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower_edge) / (center - lower_edge);
            let falling = (upper_edge - freq) / (upper_edge - center);
            let weight = rising.min(falling).max(0.0);
            filters[i * n_freqs + k] = (weight * enorm) as f32;
        }
    }

    filters
}
