//! Console rendering of finished runs

use doctai_error::{Error, ErrorKind, Result};
use doctai_runtime::TestRun;
use std::fmt::Write;
use std::path::Path;

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}…", head)
    }
}

/// Human-readable report. `verbose` adds the stderr excerpt of failed scripts.
pub fn render(runs: &[TestRun], verbose: bool) -> String {
    let mut out = String::new();
    let rule = "=".repeat(80);

    for run in runs {
        let _ = writeln!(out, "{}", rule);
        let verdict = if run.overall_success { "PASSED" } else { "FAILED" };
        let _ = writeln!(
            out,
            "{}: {} ({}) after {} iteration(s)",
            run.source_id,
            verdict,
            run.terminal_reason,
            run.iterations.len()
        );
        let _ = writeln!(out, "  work dir: {}", run.work_dir.display());
        if let Some(error) = &run.error {
            let _ = writeln!(out, "  error: {}", error);
        }

        for iteration in &run.iterations {
            let passed = iteration.scripts.iter().filter(|s| s.success).count();
            let _ = writeln!(
                out,
                "  iteration {}: {} candidate(s), {}/{} passed{}",
                iteration.index,
                iteration.candidates_generated,
                passed,
                iteration.scripts.len(),
                if iteration.interrupted { " (interrupted)" } else { "" }
            );

            for script in &iteration.scripts {
                let status = if script.success {
                    "ok".to_string()
                } else if script.timed_out {
                    "timed out".to_string()
                } else {
                    match script.exit_code {
                        Some(code) => format!("exit {}", code),
                        None => "not run".to_string(),
                    }
                };
                let _ = writeln!(
                    out,
                    "    [{}] {} ({}, {} ms)",
                    status, script.name, script.language, script.duration_ms
                );

                if verbose && !script.success {
                    if let Some(line) = script.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                        let _ = writeln!(out, "        {}", truncate(line.trim(), 100));
                    }
                }
            }
        }
    }

    let passed = runs.iter().filter(|r| r.overall_success).count();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "{}/{} source(s) passed", passed, runs.len());
    out
}

/// Write all runs as pretty JSON
pub fn write_json(runs: &[TestRun], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(runs).map_err(|e| {
        Error::new(ErrorKind::SerializationFailed, "failed to serialize results")
            .with_operation("summary::write_json")
            .set_source(e)
    })?;

    std::fs::write(path, json).map_err(|e| {
        Error::from(e)
            .with_operation("summary::write_json")
            .with_context("path", path.display().to_string())
    })
}
