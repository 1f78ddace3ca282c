//! # doctai Agent
//!
//! The agent verifies documentation by letting an AI turn it into scripts:
//! 1. The documentation is framed into an initial prompt
//! 2. The provider replies with fenced scripts
//! 3. Scripts run in order inside the run's working directory
//! 4. Failures are summarized and sent back as the next turn
//! 5. Repeat until one iteration passes completely or the budget runs out
//!
//! Provider errors end a run immediately; nothing is retried.

mod config;
mod controller;
pub mod prompt;

pub use config::{DocumentSource, RunConfig, DEFAULT_MAX_ITERATIONS};
pub use controller::TestRunner;
pub use prompt::PromptTemplates;
