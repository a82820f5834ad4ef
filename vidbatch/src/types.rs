use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{CaptionStyle, EncodeSettings, Preset};

/// How a job transforms its input. Fixed when the job is planned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobParameters {
    pub preset: Preset,
    pub encode: EncodeSettings,
    /// Present only for presets that burn captions.
    pub captions: Option<CaptionStyle>,
}

/// The slice of the input a clip job copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipSpan {
    /// 1-based, as it appears in the output name.
    pub number: u32,
    pub start_seconds: f64,
    /// `None` when the input's duration is unknown: copy to the end.
    pub length_seconds: Option<f64>,
}

/// One input-file-to-output-file unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    /// Position in the plan, starting at 0.
    pub index: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub parameters: JobParameters,
    /// Set only for clip presets.
    pub clip: Option<ClipSpan>,
}

impl Job {
    /// Input file name for log messages.
    pub fn display_name(&self) -> String {
        display_name(&self.input_path)
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// An input left out of the plan because an output already exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedInput {
    pub input_path: PathBuf,
    pub existing_output: PathBuf,
}

/// Terminal classification of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { reason: String },
    Skipped { existing_output: PathBuf },
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Succeeded => write!(f, "succeeded"),
            ExecutionOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            ExecutionOutcome::Skipped { existing_output } => {
                write!(f, "skipped (output exists: {})", existing_output.display())
            }
            ExecutionOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-outcome counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Succeeded => self.succeeded += 1,
            ExecutionOutcome::Failed { .. } => self.failed += 1,
            ExecutionOutcome::Skipped { .. } => self.skipped += 1,
            ExecutionOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.cancelled
    }

    /// Nothing failed and nothing was cancelled.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} cancelled",
            self.succeeded, self.failed, self.skipped, self.cancelled
        )
    }
}

/// Outcome of one planned job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub index: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub outcome: ExecutionOutcome,
}

/// Batch lifecycle: `Idle → Planning → Running → (Completed | Cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Planning,
    Running,
    Completed,
    Cancelled,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Cancelled)
    }
}

/// Everything a finished batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub state: BatchState,
    pub output_dir: PathBuf,
    pub summary: BatchSummary,
    /// One entry per job that was started, in plan order.
    pub jobs: Vec<JobRecord>,
    pub skipped: Vec<SkippedInput>,
}

impl BatchReport {
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
