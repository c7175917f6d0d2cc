//! # Transcription Module
//!
//! Speech-to-text with Whisper models via the Candle framework.
//!
//! ## Key Components:
//! - **model**: model sizes, result types and the `SpeechModel`/`ModelLoader` traits
//! - **whisper**: the candle-backed Whisper implementation
//! - **cache**: keeps a single loaded model, swapping on demand
//! - **cancel**: the process-wide cancellation flag
//! - **engine**: job admission, cancellation checkpoints, blocking inference
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod cache;
pub mod cancel;
pub mod engine;
pub mod model;
pub mod whisper;

pub use cancel::CancellationSignal;
pub use engine::{JobError, TranscriptionEngine};
pub use model::{ModelLoader, ModelSize, Segment, SpeechModel, TranscriptionResult};
pub use whisper::WhisperLoader;
