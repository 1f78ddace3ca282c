//! Run records shared by the executor, the controller and the reporting layer

use crate::extract::ScriptLanguage;
use crate::provider::ProviderErrorKind;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of running one script candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub script_id: String,
    /// File name inside the working directory
    pub name: String,
    pub language: ScriptLanguage,
    pub success: bool,
    /// `None` when the script never started or was killed by a signal
    pub exit_code: Option<i32>,
    #[serde(rename = "stdoutExcerpt")]
    pub stdout: String,
    #[serde(rename = "stderrExcerpt")]
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// A script that could not be written or launched
    pub fn launch_failure(
        script_id: impl Into<String>,
        name: impl Into<String>,
        language: ScriptLanguage,
        reason: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            script_id: script_id.into(),
            name: name.into(),
            language,
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.into(),
            duration_ms: elapsed.as_millis() as u64,
            timed_out: false,
        }
    }
}

/// One request/extract/execute cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationReport {
    /// 1-based
    pub index: usize,
    pub candidates_generated: usize,
    /// Results in execution order. Skipped candidates have no entry.
    pub scripts: Vec<ExecutionResult>,
    pub success: bool,
    /// Cancellation cut the iteration short
    pub interrupted: bool,
}

impl IterationReport {
    pub fn new(index: usize, candidates_generated: usize, scripts: Vec<ExecutionResult>) -> Self {
        let success = candidates_generated > 0 && scripts.iter().all(|s| s.success);
        Self {
            index,
            candidates_generated,
            scripts,
            success,
            interrupted: false,
        }
    }

    /// Mark the iteration as cancelled. Scripts that never ran are not a pass.
    pub fn interrupted(mut self) -> Self {
        self.interrupted = true;
        self.success = false;
        self
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Success,
    Exhausted,
    AuthenticationError,
    ProviderError(ProviderErrorKind),
    Aborted,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Exhausted => "Exhausted",
            Self::AuthenticationError => "AuthenticationError",
            Self::ProviderError(_) => "ProviderError",
            Self::Aborted => "Aborted",
        }
    }

    pub fn provider_error_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::ProviderError(kind) => Some(*kind),
            Self::AuthenticationError => Some(ProviderErrorKind::AuthError),
            _ => None,
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderError(kind) => write!(f, "ProviderError({})", kind),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl Serialize for TerminalReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The record of verifying one documentation source
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub source_id: String,
    pub work_dir: PathBuf,
    pub iterations: Vec<IterationReport>,
    pub overall_success: bool,
    pub terminal_reason: TerminalReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_error: Option<ProviderErrorKind>,
    /// Provider failure message, when the run ended on one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scripts_executed: usize,
    pub scripts_passed: usize,
    pub scripts_failed: usize,
    pub duration_ms: u64,
}

impl TestRun {
    /// Seal a run. The terminal reason is fixed here and nowhere else.
    pub fn finish(
        source_id: impl Into<String>,
        work_dir: PathBuf,
        iterations: Vec<IterationReport>,
        terminal_reason: TerminalReason,
        error: Option<String>,
        elapsed: Duration,
    ) -> Self {
        let scripts_executed = iterations.iter().map(|i| i.scripts.len()).sum();
        let scripts_passed = iterations
            .iter()
            .flat_map(|i| &i.scripts)
            .filter(|s| s.success)
            .count();

        Self {
            source_id: source_id.into(),
            work_dir,
            iterations,
            overall_success: terminal_reason == TerminalReason::Success,
            terminal_reason,
            provider_error: terminal_reason.provider_error_kind(),
            error,
            scripts_executed,
            scripts_passed,
            scripts_failed: scripts_executed - scripts_passed,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}
