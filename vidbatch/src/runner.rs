//! Running a planned batch on a background task.
//!
//! The caller starts a [`BatchRunner`], then consumes [`BatchEvent`]s from the
//! returned [`BatchHandle`] while jobs run one at a time. Cancellation goes
//! through the shared [`CancelSignal`]; it is observed between jobs, while a
//! duration probe or caption source is running, and while the engine is
//! streaming.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::captions::{self, CaptionSource};
use crate::config::BatchOptions;
use crate::engine;
use crate::error::{Error, Result};
use crate::planner::{JobPlanner, Plan};
use crate::probe;
use crate::progress::ProgressParser;
use crate::supervisor::{remove_best_effort, ArtifactGuard, CancelSignal, ProcessSupervisor};
use crate::types::{
    BatchReport, BatchState, BatchSummary, ExecutionOutcome, Job, JobParameters, JobRecord, SkippedInput,
};

/// Notifications delivered to the caller while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Human-readable message naming the file it concerns.
    Log(String),
    Planned { jobs: usize, skipped: usize },
    Skipped(SkippedInput),
    JobStarted { index: usize, input: PathBuf, total: usize },
    /// Non-decreasing per job, within `[0, 1]`.
    Progress { index: usize, fraction: f64 },
    JobDone { index: usize, input: PathBuf, outcome: ExecutionOutcome },
    Finished(BatchSummary),
}

/// What a batch runs over.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchTarget {
    Directory(PathBuf),
    File(PathBuf),
}

/// A start request: the input and, optionally, where outputs go.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub target: BatchTarget,
    /// Defaults to the preset's subdirectory of the input directory.
    pub output_dir: Option<PathBuf>,
}

impl BatchRequest {
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            target: BatchTarget::Directory(dir.into()),
            output_dir: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: BatchTarget::File(path.into()),
            output_dir: None,
        }
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    fn input_dir(&self) -> &Path {
        match &self.target {
            BatchTarget::Directory(dir) => dir,
            BatchTarget::File(path) => path.parent().unwrap_or_else(|| Path::new(".")),
        }
    }

    /// The same request with absolute input and output paths.
    fn absolute(&self) -> Result<BatchRequest> {
        let absolute = |path: &Path| {
            std::path::absolute(path).map_err(|source| Error::Planning {
                path: path.to_path_buf(),
                source,
            })
        };
        Ok(Self {
            target: match &self.target {
                BatchTarget::Directory(dir) => BatchTarget::Directory(absolute(dir)?),
                BatchTarget::File(path) => BatchTarget::File(absolute(path)?),
            },
            output_dir: self.output_dir.as_deref().map(absolute).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Events(Option<mpsc::UnboundedSender<BatchEvent>>);

impl Events {
    fn send(&self, event: BatchEvent) {
        if let Some(tx) = &self.0 {
            // A caller that stopped listening does not stop the batch.
            let _ = tx.send(event);
        }
    }

    fn log(&self, message: impl Into<String>) {
        self.send(BatchEvent::Log(message.into()));
    }
}

/// Runs one batch, sequentially, then is spent.
pub struct BatchRunner {
    options: BatchOptions,
    captions: Option<Arc<dyn CaptionSource>>,
    cancel: CancelSignal,
    state: watch::Sender<BatchState>,
}

impl BatchRunner {
    pub fn new(options: BatchOptions) -> Self {
        let (state, _) = watch::channel(BatchState::Idle);
        Self {
            options,
            captions: None,
            cancel: CancelSignal::new(),
            state,
        }
    }

    /// Caption source used by presets that burn captions.
    pub fn with_captions(mut self, source: Arc<dyn CaptionSource>) -> Self {
        self.captions = Some(source);
        self
    }

    /// Handle for cancelling this batch from elsewhere.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn state(&self) -> BatchState {
        *self.state.borrow()
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Run the batch on a background task and return immediately.
    pub fn start(self, request: BatchRequest) -> BatchHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(async move { self.execute(request, Events(Some(tx))).await });
        BatchHandle {
            events: rx,
            cancel,
            state,
            task,
        }
    }

    /// Run the batch to the end on the current task, without events.
    pub async fn run(self, request: BatchRequest) -> Result<BatchReport> {
        self.execute(request, Events::default()).await
    }

    fn set_state(&self, state: BatchState) {
        info!(?state, "batch state");
        self.state.send_replace(state);
    }

    async fn execute(self, request: BatchRequest, events: Events) -> Result<BatchReport> {
        let result = self.execute_inner(&request, &events).await;
        if let Err(e) = &result {
            warn!(error = %e, "batch aborted");
            events.log(format!("batch aborted: {e}"));
        }
        result
    }

    async fn execute_inner(&self, request: &BatchRequest, events: &Events) -> Result<BatchReport> {
        self.set_state(BatchState::Planning);
        let request = request.absolute()?;

        if self.options.preset.needs_captions() && self.captions.is_none() {
            return Err(Error::InvalidOption(format!(
                "preset {} needs a caption source",
                self.options.preset
            )));
        }
        probe::check_engine(&self.options.ffmpeg).await?;

        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| request.input_dir().join(self.options.resolve_output_dir_name()));

        let planner = JobPlanner::from_options(&self.options)?;
        let parameters = JobParameters {
            preset: self.options.preset,
            encode: self.options.encode.clone(),
            captions: self
                .options
                .preset
                .needs_captions()
                .then(|| self.options.caption_style.clone()),
        };
        let candidates = match &request.target {
            BatchTarget::Directory(dir) => planner.candidates(dir)?,
            BatchTarget::File(path) => planner.file_candidate(path)?.into_iter().collect(),
        };
        let inputs = if planner.needs_durations() {
            self.probe_inputs(candidates, events).await
        } else {
            candidates.into_iter().map(|path| (path, None)).collect()
        };
        let Plan { jobs, skipped } = planner.plan_inputs(inputs, &output_dir, &parameters);

        let mut summary = BatchSummary::default();
        events.send(BatchEvent::Planned {
            jobs: jobs.len(),
            skipped: skipped.len(),
        });
        for entry in &skipped {
            summary.record(&ExecutionOutcome::Skipped {
                existing_output: entry.existing_output.clone(),
            });
            events.log(format!(
                "{}: skipped, output already exists ({})",
                crate::types::display_name(&entry.input_path),
                entry.existing_output.display()
            ));
            events.send(BatchEvent::Skipped(entry.clone()));
        }

        let mut records = Vec::with_capacity(jobs.len());

        if jobs.is_empty() {
            let state = if self.cancel.is_cancelled() {
                BatchState::Cancelled
            } else {
                events.log("nothing to do");
                BatchState::Completed
            };
            self.set_state(state);
            events.send(BatchEvent::Finished(summary));
            return Ok(BatchReport {
                state,
                output_dir,
                summary,
                jobs: records,
                skipped,
            });
        }

        tokio::fs::create_dir_all(&output_dir).await?;
        self.set_state(BatchState::Running);

        let total = jobs.len();
        for job in &jobs {
            if self.cancel.is_cancelled() {
                info!(remaining = total - job.index, "cancelled, abandoning remaining jobs");
                break;
            }

            events.send(BatchEvent::JobStarted {
                index: job.index,
                input: job.input_path.clone(),
                total,
            });
            events.log(format!("[{}/{total}] {}", job.index + 1, job.display_name()));

            let outcome = self.run_job(job, events).await;
            summary.record(&outcome);
            events.send(BatchEvent::JobDone {
                index: job.index,
                input: job.input_path.clone(),
                outcome: outcome.clone(),
            });

            let stop = outcome == ExecutionOutcome::Cancelled;
            records.push(JobRecord {
                index: job.index,
                input_path: job.input_path.clone(),
                output_path: job.output_path.clone(),
                outcome,
            });
            if stop {
                break;
            }
        }

        let state = if self.cancel.is_cancelled() {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };
        info!(%summary, "batch finished");
        events.log(format!("batch finished: {summary}"));
        self.set_state(state);
        events.send(BatchEvent::Finished(summary));

        Ok(BatchReport {
            state,
            output_dir,
            summary,
            jobs: records,
            skipped,
        })
    }

    /// Durations for clip planning. Inputs left unprobed when cancellation
    /// arrives are dropped from the plan.
    async fn probe_inputs(&self, candidates: Vec<PathBuf>, events: &Events) -> Vec<(PathBuf, Option<f64>)> {
        let mut inputs = Vec::with_capacity(candidates.len());
        for path in candidates {
            let seconds = match self.probe_or_cancel(&path).await {
                None => break,
                Some(Ok(seconds)) => Some(seconds),
                Some(Err(e)) => {
                    let name = crate::types::display_name(&path);
                    warn!(input = %name, error = %e, "duration unknown, copying as one clip");
                    events.log(format!("{name}: duration unknown, copying it as a single clip"));
                    None
                }
            };
            inputs.push((path, seconds));
        }
        inputs
    }

    /// Probe `input`, or `None` if cancellation is requested first.
    async fn probe_or_cancel(&self, input: &Path) -> Option<Result<f64>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = probe::probe_duration(&self.options.ffprobe, input) => Some(result),
        }
    }

    /// Run one job to a terminal outcome, log it, and clean up after it.
    /// Never fails the batch.
    async fn run_job(&self, job: &Job, events: &Events) -> ExecutionOutcome {
        let name = job.display_name();
        let outcome = self.attempt_job(job, events).await;

        match &outcome {
            ExecutionOutcome::Succeeded => {
                info!(input = %name, output = %job.output_path.display(), "job succeeded");
                events.log(format!("{name}: done"));
            }
            ExecutionOutcome::Failed { reason } => {
                warn!(input = %name, %reason, "job failed");
                events.log(format!("{name}: failed: {reason}"));
                remove_best_effort(&job.output_path);
            }
            ExecutionOutcome::Cancelled => {
                info!(input = %name, "job cancelled");
                events.log(format!("{name}: cancelled"));
                remove_best_effort(&job.output_path);
            }
            ExecutionOutcome::Skipped { .. } => {}
        }

        outcome
    }

    async fn attempt_job(&self, job: &Job, events: &Events) -> ExecutionOutcome {
        let name = job.display_name();

        let total_seconds = match &job.clip {
            Some(clip) => clip.length_seconds,
            None => match self.probe_or_cancel(&job.input_path).await {
                None => return ExecutionOutcome::Cancelled,
                Some(Ok(seconds)) => Some(seconds),
                Some(Err(e)) => {
                    warn!(input = %name, error = %e, "duration unknown, progress disabled");
                    events.log(format!("{name}: duration unknown, progress disabled"));
                    None
                }
            },
        };

        let sidecar = if job.parameters.preset.needs_captions() {
            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ExecutionOutcome::Cancelled,
                written = self.write_sidecar(job) => written,
            };
            match written {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(input = %name, error = %e, "caption sidecar failed");
                    return ExecutionOutcome::Failed { reason: e.to_string() };
                }
            }
        } else {
            None
        };

        let args = match engine::build_args(job, sidecar.as_ref().map(ArtifactGuard::path)) {
            Ok(args) => args,
            Err(e) => return ExecutionOutcome::Failed { reason: e.to_string() },
        };

        let supervisor = ProcessSupervisor::new(&self.options.ffmpeg)
            .kill_grace(self.options.kill_grace)
            .tail_lines(self.options.failure_tail_lines);
        let mut parser = ProgressParser::new(total_seconds);
        let index = job.index;

        supervisor
            .run(
                &args,
                |line| {
                    if let Some(fraction) = parser.feed(line) {
                        events.send(BatchEvent::Progress { index, fraction });
                    }
                },
                &self.cancel,
            )
            .await
    }

    /// Compose the caption sidecar beside the input; removed when the guard drops.
    async fn write_sidecar(&self, job: &Job) -> Result<ArtifactGuard> {
        let source = self
            .captions
            .as_ref()
            .ok_or_else(|| Error::Captions("no caption source configured".into()))?;
        let segments = source.segments(&job.input_path).await?;
        let spacing = job.parameters.captions.as_ref().and_then(|style| style.spacing);

        let guard = ArtifactGuard::new(captions::sidecar_path(&job.input_path));
        tokio::fs::write(guard.path(), captions::compose_srt(&segments, spacing)).await?;
        Ok(guard)
    }
}

/// The caller's side of a running batch.
pub struct BatchHandle {
    events: mpsc::UnboundedReceiver<BatchEvent>,
    cancel: CancelSignal,
    state: watch::Receiver<BatchState>,
    task: JoinHandle<Result<BatchReport>>,
}

impl BatchHandle {
    /// Next event; `None` once the batch has ended and every event was read.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn state(&self) -> BatchState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<BatchState> {
        self.state.clone()
    }

    /// Wait for the batch and return its report.
    pub async fn join(self) -> Result<BatchReport> {
        self.task
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;

    #[test]
    fn test_request_default_input_dir() {
        let request = BatchRequest::directory("/videos");
        assert_eq!(request.input_dir(), Path::new("/videos"));

        let request = BatchRequest::file("/videos/a.mp4").output_dir("/out");
        assert_eq!(request.input_dir(), Path::new("/videos"));
        assert_eq!(request.output_dir, Some(PathBuf::from("/out")));
    }

    #[test]
    fn test_request_made_absolute() {
        let request = BatchRequest::directory("videos").output_dir("out").absolute().unwrap();
        match &request.target {
            BatchTarget::Directory(dir) => {
                assert!(dir.is_absolute());
                assert!(dir.ends_with("videos"));
            }
            other => panic!("unexpected target {other:?}"),
        }
        assert!(request.output_dir.as_deref().is_some_and(Path::is_absolute));

        let request = BatchRequest::file("clip.mp4").absolute().unwrap();
        assert!(request.input_dir().is_absolute());
    }

    #[test]
    fn test_new_runner_is_idle() {
        let runner = BatchRunner::new(BatchOptions::default());
        assert_eq!(runner.state(), BatchState::Idle);
        assert!(!runner.cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_engine_is_fatal() {
        let options = BatchOptions::new().ffmpeg("/nonexistent/vidbatch-ffmpeg");
        let result = BatchRunner::new(options).run(BatchRequest::directory("/tmp")).await;
        assert!(matches!(result, Err(Error::EngineNotFound { .. })));
    }

    #[tokio::test]
    async fn test_burn_captions_without_source_is_rejected() {
        let options = BatchOptions::new().preset(Preset::BurnCaptions);
        let result = BatchRunner::new(options).run(BatchRequest::directory("/tmp")).await;
        assert!(matches!(result, Err(Error::InvalidOption(_))));
    }

    #[tokio::test]
    async fn test_events_ignored_without_listener() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let events = Events(Some(tx));
        events.log("nobody is listening");
        Events::default().log("no channel at all");
    }
}
