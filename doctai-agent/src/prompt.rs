//! Prompt construction for the documentation testing conversation

use crate::config::DocumentSource;
use doctai_runtime::IterationReport;
use std::fmt::Write;

/// Characters of stderr (or stdout) quoted back per failing script
const FEEDBACK_EXCERPT_CHARS: usize = 1000;

const SYSTEM_PREAMBLE: &str = "\
You are an expert software engineer and documentation tester. Your job is to:

1. Analyze the provided documentation (setup guides, installation instructions, tutorials)
2. Generate executable scripts that follow the documentation step by step
3. Install prerequisites, set up the environment and run the examples or tests it describes
4. Make scripts idempotent and safe to run more than once where possible
5. Print informative output and exit non-zero when a step fails

Output contract:
- Return every script in its own fenced code block tagged with its language, \
for example ```bash or ```python
- Scripts run one after another, in the order they appear, in a shared working directory
- Every script must be complete and self-contained; it is executed exactly as written
- Do not wrap code that should not be executed in bash, sh, python or other \
executable fences; use ```text for sample output";

const NO_SCRIPTS: &str = "\
No executable scripts were found in your last reply. Please provide the scripts \
as fenced code blocks tagged with their language (for example ```bash), \
in the order they should run.";

/// Message templates that are a matter of prompt wording rather than behavior
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    /// First message of every conversation
    pub system: String,
    /// Sent after a reply that contained no executable scripts
    pub no_scripts: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: SYSTEM_PREAMBLE.to_string(),
            no_scripts: NO_SCRIPTS.to_string(),
        }
    }
}

/// Frame one source for the model
pub fn format_documentation(source: &DocumentSource) -> String {
    format!(
        "=== Documentation from: {} ===\n\n{}\n\n{}\n",
        source.id,
        source.content.trim_end(),
        "=".repeat(80)
    )
}

/// The first user message: documentation, optional instructions, and the
/// ordering rules scripts must follow
pub fn initial_prompt(source: &DocumentSource, instructions: Option<&str>) -> String {
    let instructions = instructions.map(str::trim).filter(|s| !s.is_empty());

    let mut prompt = String::new();
    prompt.push_str("Here is the documentation I need you to test:\n\n");
    prompt.push_str(&format_documentation(source));

    if let Some(instructions) = instructions {
        let _ = write!(prompt, "\n## Additional Instructions\n\n{}\n", instructions);
    }

    prompt.push_str(
        "\nPlease generate executable scripts that:\n\
         1. Install any required prerequisites\n\
         2. Follow the setup and installation instructions\n\
         3. Run the examples or tests the documentation mentions\n\
         4. Verify everything works as documented\n",
    );
    if instructions.is_some() {
        prompt.push_str("5. Address the additional instructions above\n");
    }

    prompt.push_str(
        "\nScript order matters. Put setup and installation first, verification second, \
         and cleanup (if any) last. Do not write runner scripts that only chmod and call \
         other script files; every script you return is executed directly.\n",
    );

    prompt
}

/// Summarize an iteration's results as feedback for the next turn
pub fn feedback_prompt(report: &IterationReport) -> String {
    let skipped = report.candidates_generated.saturating_sub(report.scripts.len());
    let passed = report.scripts.iter().filter(|s| s.success).count();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Iteration {} results: {} of {} script(s) passed.",
        report.index,
        passed,
        report.candidates_generated
    );
    out.push('\n');

    for (i, result) in report.scripts.iter().enumerate() {
        let position = i + 1;
        if result.success {
            let _ = writeln!(out, "- Script {} ({}): passed", position, result.language);
            continue;
        }

        let status = if result.timed_out {
            "timed out".to_string()
        } else {
            match result.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "did not run to completion".to_string(),
            }
        };
        let _ = writeln!(
            out,
            "- Script {} ({}): FAILED ({})",
            position, result.language, status
        );

        let (label, text) = if result.stderr.trim().is_empty() {
            ("stdout", result.stdout.as_str())
        } else {
            ("stderr", result.stderr.as_str())
        };
        let excerpt = tail_chars(text.trim_end(), FEEDBACK_EXCERPT_CHARS);
        if !excerpt.is_empty() {
            let _ = writeln!(out, "  {}:\n```text\n{}\n```", label, excerpt);
        }
    }

    if skipped > 0 {
        let _ = writeln!(
            out,
            "\n{} script(s) were not run because an earlier script failed.",
            skipped
        );
    }

    out.push_str(
        "\nPlease fix the problems and reply with the complete, corrected set of scripts \
         in the order they should run.",
    );
    out
}

/// The last `max` characters of `text`
fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
