//! Stable process exit codes for the doctai CLI.

use doctai_error::{Error, ErrorKind};
use doctai_runtime::{TerminalReason, TestRun};

/// Every run passed.
pub const SUCCESS: i32 = 0;
/// A run exhausted its iterations or ended on a provider error.
pub const TEST_FAILURE: i32 = 1;
/// Invalid flags, provider name, documentation paths or working directory.
pub const CONFIG_ERROR: i32 = 2;
/// The provider rejected the credentials.
pub const AUTH_ERROR: i32 = 3;
/// Interrupted (Ctrl-C).
pub const ABORTED: i32 = 130;

pub fn for_reason(reason: TerminalReason) -> i32 {
    match reason {
        TerminalReason::Success => SUCCESS,
        TerminalReason::Exhausted | TerminalReason::ProviderError(_) => TEST_FAILURE,
        TerminalReason::AuthenticationError => AUTH_ERROR,
        TerminalReason::Aborted => ABORTED,
    }
}

/// The most severe code among several runs
pub fn for_runs(runs: &[TestRun]) -> i32 {
    let rank = |code: i32| match code {
        ABORTED => 3,
        AUTH_ERROR => 2,
        TEST_FAILURE => 1,
        _ => 0,
    };

    runs.iter()
        .map(|run| for_reason(run.terminal_reason))
        .max_by_key(|code| rank(*code))
        .unwrap_or(SUCCESS)
}

/// Code for an error raised before or around the runs
pub fn for_error(err: &Error) -> i32 {
    match err.kind() {
        kind if kind.is_config() => CONFIG_ERROR,
        ErrorKind::FileNotFound | ErrorKind::PermissionDenied | ErrorKind::WorkDirFailed => {
            CONFIG_ERROR
        }
        ErrorKind::ProviderAuth => AUTH_ERROR,
        _ => TEST_FAILURE,
    }
}
