//! Turning a directory listing into an ordered job list.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::BatchOptions;
use crate::error::{Error, Result};
use crate::naming::{NameResolver, NamingScheme};
use crate::types::{display_name, ClipSpan, Job, JobParameters, SkippedInput};

/// Regular files in `dir` whose extension is in `extensions`, in listing order.
///
/// `extensions` are lowercase without the dot. Any I/O error while listing is
/// [`Error::Planning`].
pub fn list_candidates(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let planning = |source| Error::Planning {
        path: dir.to_path_buf(),
        source,
    };

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).map_err(planning)? {
        let path = entry.map_err(planning)?.path();
        if !has_extension(&path, extensions) {
            continue;
        }
        // Follows symlinks, so a link to a video counts as a video.
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => candidates.push(path),
            Ok(_) => debug!(path = %path.display(), "not a regular file, ignoring"),
            Err(e) => debug!(path = %path.display(), error = %e, "unreadable entry, ignoring"),
        }
    }
    Ok(candidates)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

/// Consecutive spans of at most `max_seconds` covering `duration`.
///
/// An unknown or non-positive duration yields a single span copying the whole
/// input.
pub fn clip_spans(duration: Option<f64>, max_seconds: u32) -> Vec<ClipSpan> {
    let max = f64::from(max_seconds.max(1));
    let Some(total) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
        return vec![ClipSpan {
            number: 1,
            start_seconds: 0.0,
            length_seconds: None,
        }];
    };
    let count = (total / max).ceil() as u32;
    (0..count)
        .map(|i| {
            let start = f64::from(i) * max;
            ClipSpan {
                number: i + 1,
                start_seconds: start,
                length_seconds: Some(max.min(total - start)),
            }
        })
        .collect()
}

/// Jobs to run plus the inputs left out because their output already exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub jobs: Vec<Job>,
    pub skipped: Vec<SkippedInput>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Scans inputs and decides which of them still need work.
#[derive(Debug, Clone)]
pub struct JobPlanner {
    resolver: NameResolver,
    extensions: Vec<String>,
    /// Current suffix first, then the ones older runs used.
    suffixes: Vec<String>,
    clip_seconds: Option<u32>,
    sort_by_name: bool,
}

impl JobPlanner {
    pub fn new<I, S>(extensions: Vec<String>, schemes: Vec<NamingScheme>, suffixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if extensions.is_empty() {
            return Err(Error::InvalidOption("extension list is empty".into()));
        }
        let suffixes: Vec<String> = suffixes.into_iter().map(Into::into).collect();
        if suffixes.is_empty() {
            return Err(Error::InvalidOption("at least one output suffix is required".into()));
        }
        Ok(Self {
            resolver: NameResolver::new(schemes)?,
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
            suffixes,
            clip_seconds: None,
            sort_by_name: false,
        })
    }

    /// Planner configured from batch options and the active preset.
    pub fn from_options(options: &BatchOptions) -> Result<Self> {
        Ok(Self::new(
            options.extensions.clone(),
            options.schemes.clone(),
            options.preset.suffixes().iter().copied(),
        )?
        .split_into_clips(options.preset.clip_seconds())
        .sort_by_name(options.sort_by_name))
    }

    /// Plan in file-name order instead of directory-listing order.
    pub fn sort_by_name(mut self, enabled: bool) -> Self {
        self.sort_by_name = enabled;
        self
    }

    /// Plan one job per clip of at most this many seconds.
    pub fn split_into_clips(mut self, max_seconds: Option<u32>) -> Self {
        self.clip_seconds = max_seconds;
        self
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    /// Whether planning needs each input's duration.
    pub fn needs_durations(&self) -> bool {
        self.clip_seconds.is_some()
    }

    /// Plan every matching file in `input_dir`.
    ///
    /// Clip planning without durations copies each input as a single clip;
    /// use [`JobPlanner::plan_inputs`] with probed durations to split them.
    pub fn plan(&self, input_dir: &Path, output_dir: &Path, parameters: &JobParameters) -> Result<Plan> {
        let inputs = self.candidates(input_dir)?.into_iter().map(|p| (p, None)).collect();
        Ok(self.plan_inputs(inputs, output_dir, parameters))
    }

    /// Plan a single file with the same filtering and idempotency rules.
    pub fn plan_file(&self, input: &Path, output_dir: &Path, parameters: &JobParameters) -> Result<Plan> {
        let inputs = self.file_candidate(input)?.into_iter().map(|p| (p, None)).collect();
        Ok(self.plan_inputs(inputs, output_dir, parameters))
    }

    /// Matching files in `input_dir`, in planning order.
    pub fn candidates(&self, input_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut candidates = list_candidates(input_dir, &self.extensions)?;
        if self.sort_by_name {
            candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        }
        debug!(dir = %input_dir.display(), candidates = candidates.len(), "listed inputs");
        Ok(candidates)
    }

    /// `input` if it is a regular file with an accepted extension.
    pub fn file_candidate(&self, input: &Path) -> Result<Option<PathBuf>> {
        let meta = fs::metadata(input).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::InputNotFound {
                path: input.to_path_buf(),
            },
            _ => Error::Planning {
                path: input.to_path_buf(),
                source: e,
            },
        })?;
        if !meta.is_file() || !has_extension(input, &self.extensions) {
            debug!(path = %input.display(), "input is not a supported media file");
            return Ok(None);
        }
        Ok(Some(input.to_path_buf()))
    }

    /// Plan candidates with their durations, where known.
    pub fn plan_inputs(
        &self,
        inputs: Vec<(PathBuf, Option<f64>)>,
        output_dir: &Path,
        parameters: &JobParameters,
    ) -> Plan {
        let mut plan = Plan::default();
        for (input_path, duration) in inputs {
            match self.clip_seconds {
                Some(max_seconds) => {
                    for span in clip_spans(duration, max_seconds) {
                        let number = format!("{:02}", span.number);
                        let suffixes: Vec<String> = self.suffixes.iter().map(|s| format!("{s}{number}")).collect();
                        self.push_job(&mut plan, &input_path, output_dir, &suffixes, parameters, Some(span));
                    }
                }
                None => self.push_job(&mut plan, &input_path, output_dir, &self.suffixes, parameters, None),
            }
        }
        info!(jobs = plan.jobs.len(), skipped = plan.skipped.len(), "planned batch");
        plan
    }

    fn push_job(
        &self,
        plan: &mut Plan,
        input_path: &Path,
        output_dir: &Path,
        suffixes: &[String],
        parameters: &JobParameters,
        clip: Option<ClipSpan>,
    ) {
        if let Some(existing_output) = self.resolver.existing_output(input_path, output_dir, suffixes) {
            debug!(
                input = %display_name(input_path),
                existing = %existing_output.display(),
                "output already exists"
            );
            plan.skipped.push(SkippedInput {
                input_path: input_path.to_path_buf(),
                existing_output,
            });
            return;
        }

        plan.jobs.push(Job {
            index: plan.jobs.len(),
            input_path: input_path.to_path_buf(),
            output_path: self.resolver.resolve_output_path(input_path, output_dir, &suffixes[0]),
            parameters: parameters.clone(),
            clip,
        });
    }
}
