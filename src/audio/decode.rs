//! Decoding arbitrary audio/video containers to 16 kHz mono PCM via ffmpeg.
//!
//! This runs on a blocking worker thread (inside the transcription job), so it
//! uses `std::process` rather than the tokio process API.

use super::processor::{pcm_s16le_to_f32, validate_samples, SAMPLE_RATE};
use anyhow::{anyhow, bail, Result};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

/// Decode `input` to mono f32 samples at 16 kHz.
pub fn decode_to_pcm(ffmpeg_path: &str, input: &Path) -> Result<Vec<f32>> {
    tracing::debug!(ffmpeg = %ffmpeg_path, input = %input.display(), "Decoding audio");

    let sample_rate = SAMPLE_RATE.to_string();
    let output = Command::new(ffmpeg_path)
        .args(["-nostdin", "-threads", "0", "-i"])
        .arg(input)
        .args(["-f", "s16le", "-ac", "1", "-acodec", "pcm_s16le", "-ar"])
        .arg(&sample_rate)
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => anyhow!(
                "ffmpeg is required to decode audio but was not found at '{}'. Install it from https://ffmpeg.org/",
                ffmpeg_path
            ),
            _ => anyhow!("failed to run ffmpeg: {}", e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ffmpeg could not decode {}: {}", input.display(), last_lines(&stderr, 3));
    }

    let samples = pcm_s16le_to_f32(&output.stdout);
    validate_samples(&samples).map_err(|e| anyhow!(e))?;
    Ok(samples)
}

/// Whether `ffmpeg -version` runs.
pub fn ffmpeg_available(ffmpeg_path: &str) -> bool {
    Command::new(ffmpeg_path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

// ffmpeg prints its banner first; the cause is at the end.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_lines_keeps_tail() {
        let stderr = "ffmpeg version 6\n  built with gcc\n\nclip.wav: Invalid data found\n";
        assert_eq!(last_lines(stderr, 1), "clip.wav: Invalid data found");
        assert_eq!(last_lines(stderr, 10).matches(" | ").count(), 2);
    }

    #[test]
    fn test_missing_ffmpeg_is_reported() {
        let err = decode_to_pcm("definitely-not-ffmpeg-binary", Path::new("clip.wav")).unwrap_err();
        assert!(err.to_string().contains("ffmpeg is required"));
        assert!(!ffmpeg_available("definitely-not-ffmpeg-binary"));
    }
}
