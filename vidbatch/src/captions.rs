//! Caption sidecars: SRT composition and the engine's subtitle filter.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CaptionStyle;
use crate::error::{Error, Result};

/// A timed caption, in seconds from the start of the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Produces caption segments for an input file.
///
/// Implementations run on the batch worker; they may block the worker but
/// never the caller.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    async fn segments(&self, input: &Path) -> Result<Vec<CaptionSegment>>;
}

/// Compose SRT text.
///
/// With `spacing = Some(k)`, every caption after the first starts at
/// `prev_end + (start - prev_end) * k`, where `prev_end` is the end of the
/// previous composed caption. Starts never pass their own end. Captions with
/// no text are dropped and numbering stays contiguous.
pub fn compose_srt(segments: &[CaptionSegment], spacing: Option<f64>) -> String {
    let mut out = String::new();
    let mut prev_end: Option<f64> = None;
    let mut number = 0usize;

    for seg in segments {
        let text = seg.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }

        let mut start = seg.start;
        if let (Some(k), Some(prev)) = (spacing, prev_end) {
            start = prev + (start - prev) * k;
        }
        let start = start.min(seg.end).max(0.0);

        number += 1;
        out.push_str(&format!("{number}\n"));
        out.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(start),
            format_srt_time(seg.end)
        ));
        out.push_str(&text);
        out.push_str("\n\n");

        prev_end = Some(seg.end);
    }
    out
}

/// Format seconds as SRT timestamp: HH:MM:SS,mmm
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0) as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1_000;
    let ms = total_ms % 1_000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// `#RRGGBB` to the ASS `&HBBGGRR&` colour form.
pub fn ass_colour(hex: &str) -> Result<String> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidOption(format!(
            "colour must look like #RRGGBB, got \"{hex}\""
        )));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16)
            .map_err(|e| Error::InvalidOption(format!("bad colour \"{hex}\": {e}")))
    };
    let (r, g, b) = (channel(0..2)?, channel(2..4)?, channel(4..6)?);
    Ok(format!("&H{b:02X}{g:02X}{r:02X}&"))
}

/// Bottom margin for a vertical position percentage (0 = top, 100 = bottom).
pub fn margin_v(position_pct: u8) -> u32 {
    let pct = f64::from(position_pct.min(100)) / 100.0;
    ((1.0 - pct) * 100.0) as u32
}

/// Quote a path for use inside the engine's filter-graph syntax.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}

/// The `subtitles=` video filter for a sidecar and style.
pub fn subtitles_filter(sidecar: &Path, style: &CaptionStyle) -> Result<String> {
    Ok(format!(
        "subtitles='{}':force_style='FontName={},FontSize={},PrimaryColour={},Alignment=2,MarginV={},Outline=1,Shadow=0'",
        escape_filter_path(sidecar),
        style.font,
        style.size,
        ass_colour(&style.colour)?,
        margin_v(style.position_pct),
    ))
}

/// Where the sidecar for `input` is written: beside the input.
pub fn sidecar_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "captions".into());
    input.with_file_name(format!("{stem}.vidbatch.srt"))
}

/// Segments from a fixed list, regardless of input.
///
/// Useful when captions were produced elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticCaptions {
    segments: Vec<CaptionSegment>,
}

impl StaticCaptions {
    pub fn new(segments: Vec<CaptionSegment>) -> Self {
        Self { segments }
    }

    /// Load segments from a JSON array of `{start, end, text}` objects.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

#[async_trait]
impl CaptionSource for StaticCaptions {
    async fn segments(&self, _input: &Path) -> Result<Vec<CaptionSegment>> {
        Ok(self.segments.clone())
    }
}
