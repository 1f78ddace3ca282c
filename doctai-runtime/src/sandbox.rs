//! # Sandboxed script execution
//!
//! Runs one `ScriptCandidate` at a time inside a run's working directory.
//!
//! ## Design
//! - The body is written verbatim to `_gen-<source>-<stem>-<suffix><ext>`,
//!   marked executable and launched through the language's interpreter with
//!   the working directory as cwd and stdin closed.
//! - Each script leads its own process group. A timeout or cancellation
//!   SIGKILLs the whole group, so backgrounded children die with it.
//! - Groups of scripts that exit normally may keep children alive (a server
//!   started in the background). Those stay up for later scripts and are
//!   killed by `shutdown`, which also runs on drop. Groups found empty after
//!   a script exits are forgotten so a reused id is never signalled.
//! - stdout and stderr are drained concurrently into bounded buffers. Bytes
//!   past the limit are counted and discarded, and a truncation marker is
//!   appended to the excerpt.
//! - Failures to write or launch are reported as a failed `ExecutionResult`,
//!   never as an error.

use crate::extract::ScriptCandidate;
use crate::report::ExecutionResult;
use crate::workdir::{random_suffix, sanitize_source_id, script_file_name};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 32 * 1024;

/// How long to keep collecting output after a script exits while its
/// background children still hold the pipes open
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for readers after a process group was killed
const KILL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock limit per script
    pub timeout: Duration,
    /// Bytes kept per stream
    pub output_limit_bytes: usize,
    /// Added to the inherited environment
    pub env: Vec<(String, String)>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            env: Vec::new(),
        }
    }
}

/// Executes scripts for one test run
pub struct SandboxExecutor {
    work_dir: PathBuf,
    source_stem: String,
    config: ExecutorConfig,
    used_names: HashSet<String>,
    /// Groups that may still have live members
    process_groups: Vec<u32>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl SandboxExecutor {
    pub fn new(work_dir: impl Into<PathBuf>, source_id: &str, config: ExecutorConfig) -> Self {
        Self {
            work_dir: work_dir.into(),
            source_stem: sanitize_source_id(source_id),
            config,
            used_names: HashSet::new(),
            process_groups: Vec::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run one candidate to completion, timeout or cancellation
    #[instrument(skip_all, fields(script = %candidate.id, language = %candidate.language))]
    pub async fn execute(
        &mut self,
        candidate: &ScriptCandidate,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let name = self.unique_name(candidate);
        let path = self.work_dir.join(&name);

        if let Err(e) = write_script(&path, &candidate.body).await {
            warn!(file = %name, error = %e, "failed to write script");
            return ExecutionResult::launch_failure(
                &candidate.id,
                name,
                candidate.language,
                format!("failed to write script file: {}", e),
                started.elapsed(),
            );
        }

        let interpreter = candidate.language.interpreter();
        let mut cmd = Command::new(interpreter);
        cmd.arg(&name)
            .current_dir(&self.work_dir)
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(file = %name, interpreter, "spawning script");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(interpreter, error = %e, "failed to launch interpreter");
                return ExecutionResult::launch_failure(
                    &candidate.id,
                    name,
                    candidate.language,
                    format!("failed to launch interpreter '{}': {}", interpreter, e),
                    started.elapsed(),
                );
            }
        };

        let pgid = child.id();
        if let Some(pgid) = pgid {
            self.process_groups.push(pgid);
        }

        let limit = self.config.output_limit_bytes;
        let stdout = Arc::new(Mutex::new(Capture::default()));
        let stderr = Arc::new(Mutex::new(Capture::default()));
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(drain_limited(out, limit, stdout.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(drain_limited(err, limit, stderr.clone())));
        }

        let deadline = started + self.config.timeout;
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep_until(deadline.into()) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let (exit_code, timed_out, note) = match outcome {
            Outcome::Exited(Ok(status)) => {
                // Background children may keep the pipes open indefinitely.
                // Collect what arrives shortly and leave the readers detached.
                let grace = OUTPUT_GRACE.min(deadline.saturating_duration_since(Instant::now()));
                let _ = tokio::time::timeout(grace, join_all(readers)).await;
                self.forget_empty_groups();
                (status.code(), false, None)
            }
            Outcome::Exited(Err(e)) => {
                warn!(error = %e, "failed to wait for script");
                self.kill_group(pgid);
                (None, false, Some(format!("failed to wait for script: {}", e)))
            }
            Outcome::TimedOut => {
                warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "script timed out, killing process group"
                );
                self.kill_group(pgid);
                let _ = child.kill().await;
                let _ = tokio::time::timeout(KILL_GRACE, join_all(readers)).await;
                let note = format!(
                    "script timed out after {} seconds",
                    self.config.timeout.as_secs()
                );
                (None, true, Some(note))
            }
            Outcome::Cancelled => {
                info!("run cancelled, killing process group");
                self.kill_group(pgid);
                let _ = child.kill().await;
                let _ = tokio::time::timeout(KILL_GRACE, join_all(readers)).await;
                (None, false, Some("execution cancelled".to_string()))
            }
        };

        let elapsed = started.elapsed();
        let mut stderr_text = snapshot(&stderr);
        if let Some(note) = note {
            if !stderr_text.is_empty() && !stderr_text.ends_with('\n') {
                stderr_text.push('\n');
            }
            stderr_text.push_str(&format!("[{}]", note));
        }

        let success = !timed_out && exit_code == Some(0);
        debug!(
            exit_code = ?exit_code,
            timed_out,
            success,
            duration_ms = elapsed.as_millis() as u64,
            "script finished"
        );

        ExecutionResult {
            script_id: candidate.id.clone(),
            name,
            language: candidate.language,
            success,
            exit_code,
            stdout: snapshot(&stdout),
            stderr: stderr_text,
            duration_ms: elapsed.as_millis() as u64,
            timed_out,
        }
    }

    /// Kill every process group still tracked by this executor
    pub fn shutdown(&mut self) {
        for pgid in std::mem::take(&mut self.process_groups) {
            kill_process_group(pgid);
        }
    }

    /// Stop tracking groups with no members left; their ids may be reused
    fn forget_empty_groups(&mut self) {
        self.process_groups.retain(|pgid| {
            let alive = process_group_exists(*pgid);
            if !alive {
                debug!(pgid, "process group is empty");
            }
            alive
        });
    }

    fn kill_group(&mut self, pgid: Option<u32>) {
        if let Some(pgid) = pgid {
            kill_process_group(pgid);
            self.process_groups.retain(|p| *p != pgid);
        }
    }

    /// A name not used before in this run nor present on disk
    fn unique_name(&mut self, candidate: &ScriptCandidate) -> String {
        let stem = Path::new(&candidate.suggested_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize_source_id)
            .unwrap_or_else(|| candidate.id.clone());
        let extension = candidate.language.extension();

        loop {
            let name = script_file_name(&self.source_stem, &stem, &random_suffix(), extension);
            if !self.used_names.contains(&name) && !self.work_dir.join(&name).exists() {
                self.used_names.insert(name.clone());
                return name;
            }
        }
    }
}

impl Drop for SandboxExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn write_script(path: &Path, body: &str) -> std::io::Result<()> {
    tokio::fs::write(path, body).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    Ok(())
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "killed process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Sends signal 0. A group we may not signal is not ours either.
#[cfg(unix)]
fn process_group_exists(pgid: u32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pgid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_group_exists(_pgid: u32) -> bool {
    false
}

// ============================================================================
// Bounded output capture
// ============================================================================

#[derive(Debug, Default)]
struct Capture {
    data: Vec<u8>,
    omitted: usize,
}

impl Capture {
    fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.omitted > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated: {} bytes omitted]", self.omitted));
        }
        text
    }
}

/// Read until EOF, keeping at most `limit` bytes and counting the rest
async fn drain_limited<R>(mut reader: R, limit: usize, capture: Arc<Mutex<Capture>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "output stream closed with error");
                break;
            }
        };

        let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
        let room = limit.saturating_sub(capture.data.len());
        let keep = n.min(room);
        capture.data.extend_from_slice(&buf[..keep]);
        capture.omitted += n - keep;
    }
}

fn snapshot(capture: &Arc<Mutex<Capture>>) -> String {
    capture
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .render()
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}
