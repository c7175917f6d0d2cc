//! # PCM Conversion
//!
//! Turns the raw little-endian 16-bit PCM produced by the decoder into the
//! 32-bit float samples Whisper consumes.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Whisper expects 16 kHz mono audio.
pub const SAMPLE_RATE: u32 = 16_000;

/// Convert s16le PCM bytes to floats in [-1.0, 1.0].
///
/// A trailing odd byte (a truncated sample) is ignored.
pub fn pcm_s16le_to_f32(data: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    samples
}

/// Duration in seconds of a 16 kHz sample buffer.
pub fn duration_seconds(samples: &[f32]) -> f64 {
    samples.len() as f64 / SAMPLE_RATE as f64
}

/// Reject buffers the model cannot do anything useful with.
pub fn validate_samples(samples: &[f32]) -> Result<(), String> {
    if samples.is_empty() {
        return Err("Decoded audio contains no samples".to_string());
    }

    if samples.iter().any(|s| !s.is_finite()) {
        return Err("Decoded audio contains non-finite samples".to_string());
    }

    Ok(())
}
