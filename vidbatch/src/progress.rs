//! Progress extraction from the engine's diagnostic stream.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// `time=HH:MM:SS[.frac]`, hours unbounded, fraction of any length.
static ELAPSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=\s*(\d+):(\d+):(\d+)(?:\.(\d+))?").expect("valid elapsed-time regex")
});

/// Elapsed and total seconds for one parsed line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    pub elapsed_seconds: f64,
    pub total_seconds: f64,
}

impl ProgressSample {
    /// Completion fraction clamped to `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_seconds <= 0.0 || !self.total_seconds.is_finite() {
            return 0.0;
        }
        (self.elapsed_seconds / self.total_seconds).clamp(0.0, 1.0)
    }
}

/// Turns engine lines into a monotonic completion fraction for one job.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    total_seconds: Option<f64>,
    last: Option<f64>,
}

impl ProgressParser {
    /// `total_seconds` comes from the duration probe; `None` or a non-positive
    /// value disables reporting for the job.
    pub fn new(total_seconds: Option<f64>) -> Self {
        let total_seconds = total_seconds.filter(|t| t.is_finite() && *t > 0.0);
        Self {
            total_seconds,
            last: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.total_seconds.is_some()
    }

    /// Last fraction handed out, if any.
    pub fn last_fraction(&self) -> Option<f64> {
        self.last
    }

    /// Feed one line. Returns a fraction only when it advances past the last
    /// reported value, so callers never see progress rewind.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let total = self.total_seconds?;
        let elapsed = parse_elapsed(line)?;

        let fraction = ProgressSample {
            elapsed_seconds: elapsed,
            total_seconds: total,
        }
        .fraction();

        match self.last {
            Some(last) if fraction <= last => None,
            _ => {
                self.last = Some(fraction);
                Some(fraction)
            }
        }
    }
}

/// Last elapsed timestamp on a line, in seconds.
///
/// Lines without a timestamp, and malformed ones (minutes or seconds ≥ 60,
/// overflowing hours), yield `None`.
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let caps = ELAPSED_RE.captures_iter(line).last()?;

    let parsed = (|| {
        let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
        let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
        let seconds: u64 = caps.get(3)?.as_str().parse().ok()?;
        if minutes >= 60 || seconds >= 60 {
            return None;
        }
        let frac = match caps.get(4) {
            Some(digits) => format!("0.{}", digits.as_str()).parse::<f64>().ok()?,
            None => 0.0,
        };
        let whole = hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)?;
        Some(whole as f64 + frac)
    })();

    if parsed.is_none() {
        debug!(line, "ignoring malformed elapsed timestamp");
    }
    parsed
}

/// Parse a bare `HH:MM:SS[.frac]` timestamp.
pub fn parse_timestamp(ts: &str) -> Option<f64> {
    parse_elapsed(&format!("time={}", ts.trim()))
}
