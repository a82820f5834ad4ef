//! Batch media transformation: directory in, one supervised ffmpeg job per file out.
//!
//! **vidbatch** decides which files in a directory still need work (recognising
//! outputs written under older naming schemes), runs the engine on each of them
//! in turn, turns its diagnostic stream into progress, and honours cancellation
//! by terminating the running process.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> vidbatch::Result<()> {
//! use vidbatch::{BatchEvent, BatchOptions, BatchRequest, BatchRunner, Preset};
//!
//! let options = BatchOptions::new().preset(Preset::CropScale).crf(20)?;
//! let mut handle = BatchRunner::new(options).start(BatchRequest::directory("videos"));
//!
//! while let Some(event) = handle.next_event().await {
//!     if let BatchEvent::Log(line) = event {
//!         println!("{line}");
//!     }
//! }
//! let report = handle.join().await?;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

pub mod captions;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "whisper")]
pub mod model;
pub mod naming;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod supervisor;
#[cfg(feature = "whisper")]
pub mod transcribe;
pub mod types;

pub use captions::{CaptionSegment, CaptionSource, StaticCaptions};
#[cfg(feature = "whisper")]
pub use config::{Model, WhisperOptions};
pub use config::{BatchOptions, CaptionStyle, EncodeSettings, Preset};
pub use error::{Error, Result};
pub use naming::{NameResolver, NamingScheme};
pub use planner::{JobPlanner, Plan};
pub use progress::{ProgressParser, ProgressSample};
pub use runner::{BatchEvent, BatchHandle, BatchRequest, BatchRunner, BatchTarget};
pub use supervisor::{CancelSignal, ProcessSupervisor};
#[cfg(feature = "whisper")]
pub use transcribe::WhisperCaptions;
pub use types::{
    BatchReport, BatchState, BatchSummary, ClipSpan, ExecutionOutcome, Job, JobParameters, JobRecord, SkippedInput,
};

use std::path::Path;

/// Run every pending file in `dir` with default options.
pub async fn run_directory(dir: impl AsRef<Path>) -> Result<BatchReport> {
    run_directory_with_options(dir, BatchOptions::default()).await
}

/// Run every pending file in `dir` with custom options.
pub async fn run_directory_with_options(dir: impl AsRef<Path>, options: BatchOptions) -> Result<BatchReport> {
    BatchRunner::new(options)
        .run(BatchRequest::directory(dir.as_ref()))
        .await
}
