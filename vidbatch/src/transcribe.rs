//! In-process caption source backed by whisper.cpp.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::captions::{CaptionSegment, CaptionSource};
use crate::config::WhisperOptions;
use crate::error::{Error, Result};
use crate::model;

/// Sample rate whisper.cpp expects.
const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Transcribes each input with whisper and returns its segments.
///
/// The model is located (and downloaded if needed) on first use.
#[derive(Debug)]
pub struct WhisperCaptions {
    options: WhisperOptions,
    ffmpeg: PathBuf,
    model_path: OnceCell<PathBuf>,
}

impl WhisperCaptions {
    pub fn new(options: WhisperOptions) -> Self {
        Self {
            options,
            ffmpeg: PathBuf::from("ffmpeg"),
            model_path: OnceCell::new(),
        }
    }

    /// Engine used to decode audio.
    pub fn ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    async fn model_path(&self) -> Result<&PathBuf> {
        self.model_path
            .get_or_try_init(|| async {
                let cache_dir = self.options.resolve_cache_dir();
                model::ensure_model(&self.options.model, &cache_dir).await
            })
            .await
    }
}

#[async_trait]
impl CaptionSource for WhisperCaptions {
    async fn segments(&self, input: &Path) -> Result<Vec<CaptionSegment>> {
        let model_path = self.model_path().await?.clone();
        let samples = decode_audio(&self.ffmpeg, input).await?;
        let language = self.options.language.clone();
        let gpu = self.options.gpu;

        tokio::task::spawn_blocking(move || transcribe_samples(&samples, &model_path, language.as_deref(), gpu))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }
}

/// Decode any input the engine understands to 16 kHz mono f32 samples.
async fn decode_audio(ffmpeg: &Path, input: &Path) -> Result<Vec<f32>> {
    info!(path = %input.display(), "decoding audio");
    let output = Command::new(ffmpeg)
        .args(["-nostdin", "-threads", "0", "-i"])
        .arg(input)
        .args(["-f", "s16le", "-ac", "1", "-acodec", "pcm_s16le", "-ar"])
        .arg(WHISPER_SAMPLE_RATE.to_string())
        .arg("-")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Captions(format!("failed to run {}: {e}", ffmpeg.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let chars: Vec<char> = stderr.trim().chars().collect();
        let tail: String = chars[chars.len().saturating_sub(500)..].iter().collect();
        return Err(Error::Captions(format!("audio decode failed: {tail}")));
    }
    if output.stdout.is_empty() {
        return Err(Error::Captions("input has no audio".into()));
    }

    let samples = pcm_s16le_to_f32(&output.stdout);
    debug!(
        samples = samples.len(),
        seconds = samples.len() as f64 / f64::from(WHISPER_SAMPLE_RATE),
        "decoded audio"
    );
    Ok(samples)
}

/// Little-endian signed 16-bit PCM to f32 in `[-1, 1)`.
fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32768.0)
        .collect()
}

fn transcribe_samples(
    samples: &[f32],
    model_path: &Path,
    language: Option<&str>,
    gpu: bool,
) -> Result<Vec<CaptionSegment>> {
    info!(model = %model_path.display(), "loading whisper model");

    let mut ctx_params = WhisperContextParameters::new();
    ctx_params.use_gpu(gpu);

    let ctx = WhisperContext::new_with_params(
        model_path
            .to_str()
            .ok_or_else(|| Error::Model("model path contains invalid UTF-8".into()))?,
        ctx_params,
    )?;
    let mut state = ctx.create_state()?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
    match language {
        Some(code) => params.set_language(Some(code)),
        None => params.set_detect_language(true),
    }
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    state.full(params, samples)?;

    let n = state.full_n_segments();
    let mut segments = Vec::with_capacity(n.max(0) as usize);
    for i in 0..n {
        let segment = state
            .get_segment(i)
            .ok_or_else(|| Error::Captions(format!("segment {i} not found")))?;
        let text = segment
            .to_str_lossy()
            .map_err(|e| Error::Captions(format!("segment text error: {e}")))?
            .into_owned();
        // Timestamps are in centiseconds.
        segments.push(CaptionSegment {
            start: segment.start_timestamp() as f64 / 100.0,
            end: segment.end_timestamp() as f64 / 100.0,
            text,
        });
    }

    info!(segments = segments.len(), "transcription complete");
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_conversion() {
        let bytes = [0x00, 0x00, 0x00, 0x80, 0xff, 0x7f, 0x01];
        let samples = pcm_s16le_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], -1.0);
        assert!((samples[2] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_decode_missing_engine() {
        let result = decode_audio(Path::new("/nonexistent/ffmpeg"), Path::new("a.mp4")).await;
        assert!(matches!(result, Err(Error::Captions(_))));
    }

    #[tokio::test]
    async fn test_missing_custom_model_fails_segments() {
        let options = WhisperOptions::new().model(crate::config::Model::Custom("/nonexistent/model.bin".into()));
        let source = WhisperCaptions::new(options);
        let result = source.segments(Path::new("a.mp4")).await;
        assert!(matches!(result, Err(Error::ModelNotFound { .. })));
    }
}
