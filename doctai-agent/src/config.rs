//! Run configuration and documentation input

use crate::prompt::PromptTemplates;
use doctai_error::{Error, Result};
use doctai_runtime::provider::DEFAULT_REQUEST_TIMEOUT_SECS;
use doctai_runtime::sandbox::{DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_SCRIPT_TIMEOUT_SECS};
use doctai_runtime::{ExecutorConfig, ExtractorOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// One piece of documentation to verify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Path or other identifier, used in prompts and script names
    pub id: String,
    pub content: String,
}

impl DocumentSource {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// Configuration for test runs
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Upper bound on AI turns per run
    pub max_iterations: usize,
    /// Wall-clock limit per script
    pub timeout_secs: u64,
    /// Skip the rest of an iteration after the first failing script
    pub stop_on_failure: bool,
    /// Extra free-text guidance appended to the initial prompt
    pub instructions: Option<String>,
    /// Fixed working directory. A fresh temp dir is created when unset.
    pub work_dir: Option<PathBuf>,
    /// Bytes of stdout and stderr kept per script
    pub output_limit_bytes: usize,
    /// Used when resolving the provider profile
    pub request_timeout_secs: u64,
    /// Added to every script's environment
    pub env: Vec<(String, String)>,
    pub extractor: ExtractorOptions,
    pub templates: PromptTemplates,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
            stop_on_failure: false,
            instructions: None,
            work_dir: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            env: Vec::new(),
            extractor: ExtractorOptions::default(),
            templates: PromptTemplates::default(),
        }
    }
}

impl RunConfig {
    /// Reject settings that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::config_invalid("max iterations must be at least 1")
                .with_operation("config::validate"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config_invalid("script timeout must be at least 1 second")
                .with_operation("config::validate"));
        }
        if self.output_limit_bytes == 0 {
            return Err(Error::config_invalid("output limit must be at least 1 byte")
                .with_operation("config::validate"));
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
            env: self.env.clone(),
        }
    }
}
