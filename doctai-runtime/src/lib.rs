//! # doctai-runtime
//!
//! The moving parts of a documentation test run:
//!
//! - `provider` - one `send_turn` capability over OpenAI, Anthropic, Gemini
//!   and OpenAI-compatible custom endpoints
//! - `extract` - fenced-block parser turning assistant text into ordered
//!   `ScriptCandidate`s
//! - `sandbox` - sequential script execution with timeouts, process-group
//!   cleanup and bounded output
//! - `workdir` - the per-run directory that keeps generated scripts
//! - `report` - serializable run records

pub mod extract;
pub mod provider;
pub mod report;
pub mod sandbox;
pub mod workdir;

pub use extract::{ExtractorOptions, ScriptCandidate, ScriptExtractor, ScriptLanguage, TagClass};
pub use provider::{
    ChatMessage, Conversation, LlmProvider, Provider, ProviderError, ProviderErrorKind, ProviderKind,
    ProviderProfile, Role, PROVIDER_DEFAULTS,
};
pub use report::{ExecutionResult, IterationReport, TerminalReason, TestRun};
pub use sandbox::{ExecutorConfig, SandboxExecutor};
pub use workdir::WorkDir;
