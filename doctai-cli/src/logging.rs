//! Diagnostic tracing for the CLI.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. The run summary
//! and the JSON report are product output and never pass through here.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or `info` with
/// `--verbose`.
///
/// ```bash
/// RUST_LOG=doctai_runtime=debug doctai --docs README.md
/// ```
pub fn init(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
