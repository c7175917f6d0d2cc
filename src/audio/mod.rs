//! # Audio Input
//!
//! Everything between "a file on disk" and "samples Whisper can read":
//! - **decode**: ffmpeg subprocess producing 16 kHz mono s16le PCM
//! - **processor**: PCM to f32 conversion and sanity checks

pub mod decode;
pub mod processor;

pub use decode::{decode_to_pcm, ffmpeg_available};
