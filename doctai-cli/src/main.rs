//! # doctai CLI
//!
//! Tests documentation by asking an AI to turn it into scripts and running
//! them until they pass.
//!
//! Usage:
//!   doctai --docs <path>... [--provider <name>] [--model <model>]
//!
//! Examples:
//!   doctai --docs README.md
//!   doctai --docs docs/ --provider anthropic --max-iterations 5
//!   doctai --docs INSTALL.md --provider custom --api-url http://localhost:8080/v1/chat/completions --model local
//!   doctai --docs README.md --output results.json --stop-on-failure

mod exit_codes;
mod logging;
mod sources;
mod summary;

use clap::Parser;
use doctai_agent::{RunConfig, TestRunner, DEFAULT_MAX_ITERATIONS};
use doctai_error::Result;
use doctai_runtime::provider::DEFAULT_REQUEST_TIMEOUT_SECS;
use doctai_runtime::sandbox::DEFAULT_SCRIPT_TIMEOUT_SECS;
use doctai_runtime::{LlmProvider, Provider, ProviderKind, ProviderProfile};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "doctai")]
#[command(author, version, about = "doctai - test your documentation by running it")]
struct Cli {
    /// Documentation files or directories to test
    #[arg(short, long, num_args = 1.., required = true)]
    docs: Vec<PathBuf>,

    /// AI provider: openai, anthropic, gemini or custom
    #[arg(short, long, env = "DOCTAI_PROVIDER", default_value = "openai")]
    provider: String,

    /// Model name (defaults to the provider's default)
    #[arg(short, long, env = "DOCTAI_MODEL")]
    model: Option<String>,

    /// API key for the provider
    #[arg(long, env = "DOCTAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Endpoint URL (required for the custom provider)
    #[arg(long, env = "DOCTAI_API_URL")]
    api_url: Option<String>,

    /// Directory for generated scripts (a fresh temp dir by default)
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Maximum AI iterations per document
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,

    /// Per-script timeout in seconds
    #[arg(short, long, default_value_t = DEFAULT_SCRIPT_TIMEOUT_SECS)]
    timeout: u64,

    /// Per-request provider timeout in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,

    /// Skip the remaining scripts of an iteration after a failure
    #[arg(long)]
    stop_on_failure: bool,

    /// Additional instructions for the AI
    #[arg(short, long)]
    instructions: Option<String>,

    /// Write results as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quiet mode - only print the final tally
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose output: info-level logs and failing stderr in the summary
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::for_error(&e)
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    // Everything that can be rejected is rejected before the first AI call
    let kind: ProviderKind = cli.provider.parse()?;
    let sources = sources::load(&cli.docs)?;

    let config = RunConfig {
        max_iterations: cli.max_iterations,
        timeout_secs: cli.timeout,
        stop_on_failure: cli.stop_on_failure,
        instructions: cli.instructions,
        work_dir: cli.work_dir,
        request_timeout_secs: cli.request_timeout,
        ..RunConfig::default()
    };

    let profile = ProviderProfile::resolve(
        kind,
        cli.model,
        cli.api_key,
        cli.api_url,
        config.request_timeout_secs,
    )?;
    let provider = Provider::from_profile(profile)?;
    let runner = TestRunner::new(provider, config)?;

    if !cli.quiet {
        println!(
            "Testing {} document(s) with {} ({}), up to {} iteration(s) each",
            sources.len(),
            runner.provider().name(),
            runner.provider().model(),
            runner.config().max_iterations
        );
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping running scripts");
            interrupt.cancel();
        }
    });

    let runs = runner.run_all(&sources, &cancel).await?;

    let report = summary::render(&runs, cli.verbose);
    if cli.quiet {
        if let Some(tally) = report.lines().last() {
            println!("{}", tally);
        }
    } else {
        print!("{}", report);
    }

    if let Some(path) = &cli.output {
        summary::write_json(&runs, path)?;
        if !cli.quiet {
            println!("Results saved to: {}", path.display());
        }
    }

    Ok(exit_codes::for_runs(&runs))
}
