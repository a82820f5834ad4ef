//! Duration probing and engine preflight.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::planner;

/// Ask the inspection tool for a media file's duration in seconds.
///
/// A failed run, non-numeric output, or a non-positive value is
/// [`Error::Probe`]; callers treat it as "duration unknown".
pub async fn probe_duration(ffprobe: &Path, input: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Probe {
            path: input.to_path_buf(),
            reason: format!("failed to run {}: {e}", ffprobe.display()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr_truncated: String = stderr.trim().chars().take(500).collect();
        return Err(Error::Probe {
            path: input.to_path_buf(),
            reason: format!("{} exited with {}: {stderr_truncated}", ffprobe.display(), output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.trim();
    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => {
            debug!(path = %input.display(), seconds, "probed duration");
            Ok(seconds)
        }
        _ => Err(Error::Probe {
            path: input.to_path_buf(),
            reason: format!("unusable duration \"{value}\""),
        }),
    }
}

/// Check that the engine can be started at all.
pub async fn check_engine(program: &Path) -> Result<()> {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => {
            if !status.success() {
                warn!(program = %program.display(), %status, "engine -version returned failure");
            }
            Ok(())
        }
        Err(_) => Err(Error::EngineNotFound {
            program: program.to_path_buf(),
        }),
    }
}

/// Duration of one file, as listed by [`probe_durations`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationEntry {
    pub path: PathBuf,
    /// `None` when the probe failed.
    pub seconds: Option<f64>,
    pub over_limit: bool,
}

/// Probe every candidate in `dir` and flag files longer than `max_seconds`.
pub async fn probe_durations(
    ffprobe: &Path,
    dir: &Path,
    extensions: &[String],
    max_seconds: Option<f64>,
) -> Result<Vec<DurationEntry>> {
    let candidates = planner::list_candidates(dir, extensions)?;
    let mut entries = Vec::with_capacity(candidates.len());

    for path in candidates {
        let seconds = match probe_duration(ffprobe, &path).await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "duration unknown");
                None
            }
        };
        let over_limit = matches!((seconds, max_seconds), (Some(s), Some(max)) if s > max);
        entries.push(DurationEntry {
            path,
            seconds,
            over_limit,
        });
    }
    Ok(entries)
}

/// Format seconds as H:MM:SS, dropping the fraction.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
