//! Running and supervising one engine process.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::ExecutionOutcome;

/// Cancellation flag shared by the caller and the batch worker, plus the pid
/// of the process currently being supervised.
///
/// Clones share state. A signal cannot be reset; a new batch gets a new one.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    active_pid: Arc<Mutex<Option<u32>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Pid of the engine process being supervised right now, if any.
    pub fn active_pid(&self) -> Option<u32> {
        *self.active_pid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active(&self, pid: Option<u32>) {
        *self.active_pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
    }
}

/// Clears the active pid however supervision ends.
struct ActiveProcess<'a>(&'a CancelSignal);

impl Drop for ActiveProcess<'_> {
    fn drop(&mut self) {
        self.0.set_active(None);
    }
}

/// Spawns the engine, streams its diagnostics, and maps its exit to an outcome.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    program: PathBuf,
    kill_grace: Duration,
    tail_lines: usize,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            kill_grace: Duration::from_secs(5),
            tail_lines: 10,
        }
    }

    /// How long a terminated process may take to exit before it is killed.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Diagnostic lines kept for a failure reason.
    pub fn tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines.max(1);
        self
    }

    /// Run the engine with `args`, calling `on_line` for each diagnostic line
    /// as soon as it is emitted.
    ///
    /// Exit code zero is `Succeeded`, any other exit is `Failed` with the last
    /// diagnostic lines as reason. If `cancel` fires while the process runs it
    /// is terminated and `Cancelled` is returned without waiting for it to
    /// finish its work.
    pub async fn run<F>(&self, args: &[OsString], mut on_line: F, cancel: &CancelSignal) -> ExecutionOutcome
    where
        F: FnMut(&str),
    {
        if cancel.is_cancelled() {
            return ExecutionOutcome::Cancelled;
        }

        let mut child = match Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome::Failed {
                    reason: format!("failed to start {}: {e}", self.program.display()),
                }
            }
        };

        cancel.set_active(child.id());
        let _active = ActiveProcess(cancel);
        debug!(program = %self.program.display(), pid = ?child.id(), "engine started");

        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.tail_lines);

        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.terminate(&mut child).await;
                        return ExecutionOutcome::Cancelled;
                    }
                    line = next_line(&mut reader, &mut buf) => match line {
                        Ok(Some(line)) => {
                            on_line(&line);
                            if tail.len() == self.tail_lines {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "engine diagnostic stream failed");
                            break;
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.terminate(&mut child).await;
                return ExecutionOutcome::Cancelled;
            }
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => ExecutionOutcome::Succeeded,
            Ok(status) => {
                let code = status
                    .code()
                    .map(|c| format!("exit code {c}"))
                    .unwrap_or_else(|| status.to_string());
                let diagnostics = Vec::from(tail).join("\n");
                ExecutionOutcome::Failed {
                    reason: if diagnostics.is_empty() {
                        code
                    } else {
                        format!("{code}: {diagnostics}")
                    },
                }
            }
            Err(e) => ExecutionOutcome::Failed {
                reason: format!("failed to wait for {}: {e}", self.program.display()),
            },
        }
    }

    /// Ask the process to stop, then kill it if it outlives the grace period.
    async fn terminate(&self, child: &mut Child) {
        let pid = child.id();
        info!(pid = ?pid, "terminating engine");

        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                if self.signal_and_wait(child, pid).await {
                    return;
                }
            }
        }

        if let Err(e) = child.kill().await {
            warn!(pid = ?pid, error = %e, "failed to kill engine");
        }
    }

    /// SIGTERM, then wait up to the grace period. True if the process exited.
    #[cfg(unix)]
    async fn signal_and_wait(&self, child: &mut Child, pid: u32) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed");
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(_) => true,
            Err(_) => {
                warn!(pid, grace = ?self.kill_grace, "engine ignored SIGTERM, killing");
                false
            }
        }
    }
}

/// Next line, split on `\n` or `\r`; empty lines are skipped.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if buf.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(buf).into_owned())
            });
        }

        match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(pos) => {
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                if !buf.is_empty() {
                    return Ok(Some(String::from_utf8_lossy(buf).into_owned()));
                }
            }
            None => {
                let len = available.len();
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

/// Removes an intermediate file when dropped, whatever the job's outcome.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
}

impl ArtifactGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        remove_best_effort(&self.path);
    }
}

/// Delete a file, logging instead of failing. Returns whether it is gone.
pub fn remove_best_effort(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to clean up file");
            false
        }
    }
}
