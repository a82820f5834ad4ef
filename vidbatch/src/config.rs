use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::captions;
use crate::error::{Error, Result};
use crate::naming::NamingScheme;

/// Extensions accepted by default, matched case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "flv", "wmv", "m4v", "webm", "mpg", "mpeg", "ts", "ogv", "3gp",
];

/// Default clip length for [`Preset::Clips`]: three minutes.
pub const DEFAULT_CLIP_SECONDS: u32 = 180;

/// Which transformation the engine applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Portrait canvas: blurred, scaled-up copy behind a centred foreground.
    VerticalBlur,
    /// Scale to the target height and centre-crop to the target width.
    CropScale,
    /// Burn generated captions into the picture.
    BurnCaptions,
    /// Stream-copy consecutive clips of at most `max_seconds` each.
    Clips { max_seconds: u32 },
}

impl Preset {
    /// Clip preset with a validated, non-zero clip length.
    pub fn clips(max_seconds: u32) -> Result<Self> {
        if max_seconds == 0 {
            return Err(Error::InvalidOption("clip length must be at least one second".into()));
        }
        Ok(Preset::Clips { max_seconds })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Preset::VerticalBlur => "vertical-blur",
            Preset::CropScale => "crop-scale",
            Preset::BurnCaptions => "burn-captions",
            Preset::Clips { .. } => "clips",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "vertical-blur" | "vertical_blur" => Some(Preset::VerticalBlur),
            "crop-scale" | "crop_scale" => Some(Preset::CropScale),
            "burn-captions" | "captions" => Some(Preset::BurnCaptions),
            "clips" => Some(Preset::Clips {
                max_seconds: DEFAULT_CLIP_SECONDS,
            }),
            _ => None,
        }
    }

    /// Output subdirectory created under the input directory.
    pub fn output_dir_name(&self) -> &'static str {
        match self {
            Preset::VerticalBlur | Preset::CropScale => "converted",
            Preset::BurnCaptions => "legendados",
            Preset::Clips { .. } => "trechos",
        }
    }

    /// Appended to the sanitized stem of every new output. Clip outputs also
    /// get a two-digit clip number after it.
    pub fn suffix(&self) -> &'static str {
        self.suffixes()[0]
    }

    /// Every suffix an earlier run may have written, current one first.
    /// Caption runs used to keep the input's file name unchanged.
    pub fn suffixes(&self) -> &'static [&'static str] {
        match self {
            Preset::VerticalBlur | Preset::CropScale => &["_vertical"],
            Preset::BurnCaptions => &["_legendado", ""],
            Preset::Clips { .. } => &["_trecho"],
        }
    }

    /// Clip length when this preset splits its inputs.
    pub fn clip_seconds(&self) -> Option<u32> {
        match self {
            Preset::Clips { max_seconds } => Some(*max_seconds),
            _ => None,
        }
    }

    pub fn needs_captions(&self) -> bool {
        matches!(self, Preset::BurnCaptions)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a clip length given as whole minutes (`"3"`) or `mm:ss` (`"2:30"`).
pub fn parse_clip_length(text: &str) -> Result<u32> {
    let invalid = || Error::InvalidOption(format!("invalid clip length \"{text}\" (use minutes or mm:ss)"));
    let parts: Vec<&str> = text.trim().split(':').collect();
    let number = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid());
    let seconds = match parts.as_slice() {
        [minutes] => number(minutes)?.checked_mul(60),
        [minutes, seconds] => number(minutes)?
            .checked_mul(60)
            .and_then(|m| m.checked_add(number(seconds).ok()?)),
        _ => None,
    }
    .ok_or_else(invalid)?;
    if seconds == 0 {
        return Err(invalid());
    }
    Ok(seconds)
}

/// Target geometry and encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    /// x264 speed preset (`ultrafast` … `veryslow`).
    pub speed: String,
    pub crf: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            speed: "fast".into(),
            crf: 23,
        }
    }
}

const SPEED_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

/// Look of burned-in captions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionStyle {
    pub font: String,
    pub size: u32,
    /// `#RRGGBB`.
    pub colour: String,
    /// 0 = top of the frame, 100 = bottom.
    pub position_pct: u8,
    /// Shrinks the gap before each caption by this factor. `None` keeps timings.
    pub spacing: Option<f64>,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font: "Arial".into(),
            size: 8,
            colour: "#DAA520".into(),
            position_pct: 20,
            spacing: Some(0.2),
        }
    }
}

impl CaptionStyle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn font(mut self, font: impl Into<String>) -> Self {
        self.font = font.into();
        self
    }

    pub fn size(mut self, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidOption("caption size must be > 0".into()));
        }
        self.size = size;
        Ok(self)
    }

    pub fn colour(mut self, colour: impl Into<String>) -> Result<Self> {
        let colour = colour.into();
        captions::ass_colour(&colour)?;
        self.colour = colour;
        Ok(self)
    }

    pub fn position_pct(mut self, pct: u8) -> Result<Self> {
        if pct > 100 {
            return Err(Error::InvalidOption(format!(
                "caption position must be 0..=100, got {pct}"
            )));
        }
        self.position_pct = pct;
        Ok(self)
    }

    pub fn spacing(mut self, spacing: Option<f64>) -> Result<Self> {
        if let Some(k) = spacing {
            if !k.is_finite() || k <= 0.0 {
                return Err(Error::InvalidOption(format!(
                    "caption spacing must be a positive number, got {k}"
                )));
            }
        }
        self.spacing = spacing;
        Ok(self)
    }
}

/// Builder for batch options.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub preset: Preset,
    pub encode: EncodeSettings,
    pub caption_style: CaptionStyle,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
    /// Newest first; the first scheme names new outputs.
    pub schemes: Vec<NamingScheme>,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// How long a terminated engine gets to exit before it is killed.
    pub kill_grace: Duration,
    /// Diagnostic lines kept for a failure reason.
    pub failure_tail_lines: usize,
    /// Overrides the preset's output subdirectory name.
    pub output_dir_name: Option<String>,
    /// Plan in file-name order instead of directory-listing order.
    pub sort_by_name: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            preset: Preset::VerticalBlur,
            encode: EncodeSettings::default(),
            caption_style: CaptionStyle::default(),
            extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            schemes: NamingScheme::registry(),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            kill_grace: Duration::from_secs(5),
            failure_tail_lines: 10,
            output_dir_name: None,
            sort_by_name: false,
        }
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(Error::InvalidOption(format!(
                "resolution must be positive and even, got {width}x{height}"
            )));
        }
        self.encode.width = width;
        self.encode.height = height;
        Ok(self)
    }

    pub fn speed(mut self, speed: &str) -> Result<Self> {
        if !SPEED_PRESETS.contains(&speed) {
            return Err(Error::InvalidOption(format!(
                "unknown encoder speed preset \"{speed}\""
            )));
        }
        self.encode.speed = speed.to_string();
        Ok(self)
    }

    pub fn crf(mut self, crf: u8) -> Result<Self> {
        if crf > 51 {
            return Err(Error::InvalidOption(format!("crf must be 0..=51, got {crf}")));
        }
        self.encode.crf = crf;
        Ok(self)
    }

    pub fn caption_style(mut self, style: CaptionStyle) -> Self {
        self.caption_style = style;
        self
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(Error::InvalidOption("extension list is empty".into()));
        }
        self.extensions = extensions;
        Ok(self)
    }

    pub fn schemes(mut self, schemes: Vec<NamingScheme>) -> Result<Self> {
        if schemes.is_empty() {
            return Err(Error::InvalidOption(
                "at least one naming scheme is required".into(),
            ));
        }
        self.schemes = schemes;
        Ok(self)
    }

    pub fn ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    pub fn ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe = path.into();
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn failure_tail_lines(mut self, lines: usize) -> Self {
        self.failure_tail_lines = lines.max(1);
        self
    }

    pub fn output_dir_name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::InvalidOption(format!(
                "output directory name must be a single path component, got \"{name}\""
            )));
        }
        self.output_dir_name = Some(name);
        Ok(self)
    }

    pub fn sort_by_name(mut self, enabled: bool) -> Self {
        self.sort_by_name = enabled;
        self
    }

    /// Name of the output subdirectory for the active preset.
    pub fn resolve_output_dir_name(&self) -> &str {
        self.output_dir_name
            .as_deref()
            .unwrap_or_else(|| self.preset.output_dir_name())
    }
}

/// Whisper model sizes.
#[cfg(feature = "whisper")]
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    /// User-provided .ggml file path.
    Custom(PathBuf),
}

#[cfg(feature = "whisper")]
impl Model {
    /// Model filename as used by HuggingFace / whisper.cpp.
    pub fn filename(&self) -> String {
        match self {
            Model::Tiny => "ggml-tiny.bin".into(),
            Model::Base => "ggml-base.bin".into(),
            Model::Small => "ggml-small.bin".into(),
            Model::Medium => "ggml-medium.bin".into(),
            Model::Large => "ggml-large-v3.bin".into(),
            Model::Custom(path) => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom-model".into()),
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "tiny" => Some(Model::Tiny),
            "base" => Some(Model::Base),
            "small" => Some(Model::Small),
            "medium" => Some(Model::Medium),
            "large" => Some(Model::Large),
            _ => None,
        }
    }
}

/// Options for the built-in whisper caption source.
#[cfg(feature = "whisper")]
#[derive(Debug, Clone)]
pub struct WhisperOptions {
    pub model: Model,
    /// Short code ("en", "pt"); `None` auto-detects.
    pub language: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub gpu: bool,
}

#[cfg(feature = "whisper")]
impl Default for WhisperOptions {
    fn default() -> Self {
        Self {
            model: Model::Small,
            language: None,
            cache_dir: None,
            gpu: true,
        }
    }
}

#[cfg(feature = "whisper")]
impl WhisperOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Accepts codes ("en") or full names ("english"); "auto" detects.
    pub fn language(mut self, lang: &str) -> Result<Self> {
        let lower = lang.to_lowercase();
        if lower == "auto" {
            self.language = None;
            return Ok(self);
        }
        let id = whisper_rs::get_lang_id(&lower)
            .ok_or_else(|| Error::UnsupportedLanguage(lang.to_string()))?;
        let code = whisper_rs::get_lang_str(id).unwrap_or(&lower).to_string();
        self.language = Some(code);
        Ok(self)
    }

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn gpu(mut self, enabled: bool) -> Self {
        self.gpu = enabled;
        self
    }

    /// Resolve the cache directory, defaulting to ~/.cache/vidbatch/models.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("vidbatch")
                .join("models")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BatchOptions::default();
        assert_eq!(opts.preset, Preset::VerticalBlur);
        assert_eq!(opts.encode.width, 1080);
        assert_eq!(opts.encode.height, 1920);
        assert_eq!(opts.encode.crf, 23);
        assert_eq!(opts.extensions.len(), VIDEO_EXTENSIONS.len());
        assert_eq!(opts.schemes[0], NamingScheme::STRICT);
        assert_eq!(opts.kill_grace, Duration::from_secs(5));
        assert!(!opts.sort_by_name);
    }

    #[test]
    fn test_preset_layout() {
        assert_eq!(Preset::VerticalBlur.output_dir_name(), "converted");
        assert_eq!(Preset::CropScale.suffix(), "_vertical");
        assert_eq!(Preset::BurnCaptions.output_dir_name(), "legendados");
        assert_eq!(Preset::BurnCaptions.suffix(), "_legendado");
        assert!(Preset::BurnCaptions.needs_captions());
        assert!(!Preset::CropScale.needs_captions());
        assert_eq!(Preset::BurnCaptions.suffixes(), ["_legendado", ""]);

        let clips = Preset::clips(90).unwrap();
        assert_eq!(clips.output_dir_name(), "trechos");
        assert_eq!(clips.suffix(), "_trecho");
        assert_eq!(clips.clip_seconds(), Some(90));
        assert_eq!(Preset::CropScale.clip_seconds(), None);
        assert!(Preset::clips(0).is_err());
    }

    #[test]
    fn test_parse_clip_length() {
        assert_eq!(parse_clip_length("3").unwrap(), 180);
        assert_eq!(parse_clip_length("2:30").unwrap(), 150);
        assert_eq!(parse_clip_length(" 0:45 ").unwrap(), 45);
        assert!(parse_clip_length("0").is_err());
        assert!(parse_clip_length("1:2:3").is_err());
        assert!(parse_clip_length("abc").is_err());
        assert!(parse_clip_length("1:xx").is_err());
    }

    #[test]
    fn test_preset_parse_name() {
        assert_eq!(Preset::parse_name("vertical-blur"), Some(Preset::VerticalBlur));
        assert_eq!(Preset::parse_name("crop_scale"), Some(Preset::CropScale));
        assert_eq!(Preset::parse_name("captions"), Some(Preset::BurnCaptions));
        assert_eq!(Preset::parse_name("clips"), Some(Preset::Clips { max_seconds: 180 }));
        assert_eq!(Preset::parse_name("sideways"), None);
    }

    #[test]
    fn test_crf_validation() {
        assert!(BatchOptions::new().crf(0).is_ok());
        assert!(BatchOptions::new().crf(51).is_ok());
        assert!(matches!(BatchOptions::new().crf(52), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn test_resolution_validation() {
        assert!(BatchOptions::new().resolution(720, 1280).is_ok());
        assert!(BatchOptions::new().resolution(0, 1280).is_err());
        assert!(BatchOptions::new().resolution(721, 1280).is_err());
    }

    #[test]
    fn test_speed_validation() {
        assert_eq!(BatchOptions::new().speed("slow").unwrap().encode.speed, "slow");
        assert!(BatchOptions::new().speed("warp").is_err());
    }

    #[test]
    fn test_extensions_normalized() {
        let opts = BatchOptions::new().extensions([".MP4", "mkv", ""]).unwrap();
        assert_eq!(opts.extensions, vec!["mp4".to_string(), "mkv".to_string()]);
        assert!(BatchOptions::new().extensions(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_schemes_must_not_be_empty() {
        assert!(BatchOptions::new().schemes(vec![]).is_err());
        let opts = BatchOptions::new().schemes(vec![NamingScheme::VERBATIM]).unwrap();
        assert_eq!(opts.schemes, vec![NamingScheme::VERBATIM]);
    }

    #[test]
    fn test_output_dir_name_override() {
        let opts = BatchOptions::new().preset(Preset::BurnCaptions);
        assert_eq!(opts.resolve_output_dir_name(), "legendados");
        let opts = opts.output_dir_name("done").unwrap();
        assert_eq!(opts.resolve_output_dir_name(), "done");
        assert!(BatchOptions::new().output_dir_name("../escape").is_err());
        assert!(BatchOptions::new().output_dir_name("..").is_err());
    }

    #[test]
    fn test_caption_style_validation() {
        assert!(CaptionStyle::new().colour("#FFFFFF").is_ok());
        assert!(CaptionStyle::new().colour("yellow").is_err());
        assert!(CaptionStyle::new().position_pct(101).is_err());
        assert!(CaptionStyle::new().size(0).is_err());
        assert!(CaptionStyle::new().spacing(Some(0.0)).is_err());
        assert!(CaptionStyle::new().spacing(None).unwrap().spacing.is_none());
    }

    #[test]
    fn test_failure_tail_lines_at_least_one() {
        assert_eq!(BatchOptions::new().failure_tail_lines(0).failure_tail_lines, 1);
    }
}
