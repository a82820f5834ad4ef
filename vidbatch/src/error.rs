use std::path::PathBuf;

/// All errors that can occur in vidbatch.
///
/// Per-job failures and cancellations are not errors: they are reported as
/// [`ExecutionOutcome`](crate::ExecutionOutcome) values and never abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read input directory {path}: {source}")]
    Planning {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("duration probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("{program} not found, install ffmpeg and make sure it is on PATH")]
    EngineNotFound { program: PathBuf },

    #[error("input not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("caption generation failed: {0}")]
    Captions(String),

    #[error("batch worker stopped unexpectedly: {0}")]
    Worker(String),

    #[cfg(feature = "whisper")]
    #[error("model error: {0}")]
    Model(String),

    #[cfg(feature = "whisper")]
    #[error("model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[cfg(feature = "whisper")]
    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[cfg(feature = "whisper")]
    #[error("unsupported language: \"{0}\"")]
    UnsupportedLanguage(String),

    #[cfg(feature = "whisper")]
    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),

    #[cfg(feature = "whisper")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
