//! # Script extraction
//!
//! Turns free-form assistant text into an ordered list of executable
//! `ScriptCandidate`s.
//!
//! ## Design
//! - Fenced blocks are found by a line-oriented parser with two states,
//!   outside a block and inside one. A fence line only closes the block it
//!   opened (same marker, at least as long, no info string), so a shorter or
//!   different fence nested inside a block stays content.
//! - The info string's first word decides whether a block is executable,
//!   illustrative (data, markup, terminal transcripts) or unknown.
//! - A shebang naming a known interpreter rescues unknown or missing tags
//!   and wins over the tag when both name an executable language.
//! - Extraction is pure: the same text always yields the same candidates.

use serde::Serialize;
use std::fmt;
use tracing::debug;

// ============================================================================
// Languages
// ============================================================================

/// The script runtimes doctai knows how to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Bash,
    Sh,
    Zsh,
    Python,
    Node,
    Ruby,
    Perl,
}

/// How a fence's language tag is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Executable(ScriptLanguage),
    /// Data, markup or transcripts: never executed
    Illustrative,
    /// Absent or unrecognized: executed only with a known shebang
    Unknown,
}

const ILLUSTRATIVE_TAGS: &[&str] = &[
    "text", "txt", "plaintext", "plain", "json", "jsonc", "yaml", "yml", "toml", "xml", "html",
    "css", "markdown", "md", "ini", "cfg", "conf", "env", "csv", "tsv", "diff", "patch", "log",
    "output", "console", "terminal", "shell-session", "sql", "dockerfile", "makefile", "nginx",
    "properties", "mermaid",
];

impl ScriptLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Zsh => "zsh",
            Self::Python => "python",
            Self::Node => "node",
            Self::Ruby => "ruby",
            Self::Perl => "perl",
        }
    }

    /// Program used to launch a script of this language
    pub fn interpreter(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Zsh => "zsh",
            Self::Python => "python3",
            Self::Node => "node",
            Self::Ruby => "ruby",
            Self::Perl => "perl",
        }
    }

    /// File extension including the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Bash | Self::Sh | Self::Zsh => ".sh",
            Self::Python => ".py",
            Self::Node => ".js",
            Self::Ruby => ".rb",
            Self::Perl => ".pl",
        }
    }

    /// Classify a fence tag (case-insensitive)
    pub fn classify_tag(tag: Option<&str>) -> TagClass {
        let Some(tag) = tag else {
            return TagClass::Unknown;
        };
        let tag = tag.to_ascii_lowercase();

        let language = match tag.as_str() {
            "bash" | "shell" => Some(Self::Bash),
            "sh" => Some(Self::Sh),
            "zsh" => Some(Self::Zsh),
            "python" | "python3" | "py" => Some(Self::Python),
            "javascript" | "js" | "node" | "nodejs" => Some(Self::Node),
            "ruby" | "rb" => Some(Self::Ruby),
            "perl" | "pl" => Some(Self::Perl),
            _ => None,
        };

        match language {
            Some(language) => TagClass::Executable(language),
            None if ILLUSTRATIVE_TAGS.contains(&tag.as_str()) => TagClass::Illustrative,
            None => TagClass::Unknown,
        }
    }

    /// Interpreter named by a `#!` line, if it is one we can launch.
    ///
    /// Handles direct paths (`#!/bin/bash`), `env` indirection
    /// (`#!/usr/bin/env -S python3 -u`) and versioned names (`python3.11`).
    pub fn from_shebang(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("#!")?;
        let mut tokens = rest.split_whitespace();

        let program = tokens.next()?;
        let mut name = program.rsplit('/').next().unwrap_or(program);
        if name == "env" {
            name = tokens.find(|t| !t.starts_with('-'))?;
        }

        match name {
            "bash" => Some(Self::Bash),
            "sh" | "dash" => Some(Self::Sh),
            "zsh" => Some(Self::Zsh),
            "node" | "nodejs" => Some(Self::Node),
            "ruby" => Some(Self::Ruby),
            "perl" => Some(Self::Perl),
            n if n.starts_with("python") => Some(Self::Python),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// One executable block pulled out of an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptCandidate {
    /// `script-<ordinal>`, unique within one assistant message
    pub id: String,
    /// 1-based position among the accepted candidates
    pub ordinal: usize,
    pub language: ScriptLanguage,
    /// The fence tag as written, if any
    pub tag: Option<String>,
    /// Suggested file name, from an inline hint or synthesized
    pub suggested_name: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractorOptions {
    /// Drop blocks that only `chmod` and invoke other `.sh` files
    pub skip_runner_scripts: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            skip_runner_scripts: true,
        }
    }
}

/// Parses assistant text into ordered script candidates
#[derive(Debug, Clone, Default)]
pub struct ScriptExtractor {
    options: ExtractorOptions,
}

impl ScriptExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ExtractorOptions) -> Self {
        Self { options }
    }

    /// Extract executable candidates in the order they appear
    pub fn extract(&self, text: &str) -> Vec<ScriptCandidate> {
        let mut candidates = Vec::new();

        for block in fenced_blocks(text) {
            let tag = block.tag();
            let shebang = block
                .lines
                .first()
                .and_then(|line| ScriptLanguage::from_shebang(line));

            let language = match (ScriptLanguage::classify_tag(tag), shebang) {
                (TagClass::Illustrative, _) => continue,
                (_, Some(language)) => language,
                (TagClass::Executable(language), None) => language,
                (TagClass::Unknown, None) => continue,
            };

            if block.lines.iter().all(|l| l.trim().is_empty()) {
                continue;
            }

            if self.options.skip_runner_scripts && is_runner_script(&block.lines) {
                debug!(tag = ?tag, "skipping runner script");
                continue;
            }

            let ordinal = candidates.len() + 1;
            let stem = filename_hint(&block.lines)
                .unwrap_or_else(|| format!("script-{}-{}", ordinal, language));

            candidates.push(ScriptCandidate {
                id: format!("script-{}", ordinal),
                ordinal,
                language,
                tag: tag.map(str::to_string),
                suggested_name: format!("{}{}", stem, language.extension()),
                body: block.body(),
            });
        }

        candidates
    }
}

// ============================================================================
// Fence parser
// ============================================================================

/// A complete fenced block
#[derive(Debug)]
struct FencedBlock<'a> {
    info: &'a str,
    lines: Vec<String>,
}

impl<'a> FencedBlock<'a> {
    /// First word of the info string
    fn tag(&self) -> Option<&'a str> {
        self.info.split_whitespace().next()
    }

    fn body(&self) -> String {
        let mut body = self.lines.join("\n");
        body.push('\n');
        body
    }
}

/// An opening fence: marker character, run length, indentation, info string
#[derive(Debug, Clone, Copy)]
struct Fence<'a> {
    marker: char,
    len: usize,
    indent: usize,
    info: &'a str,
}

#[derive(Debug)]
enum ParseState<'a> {
    Outside,
    Inside { fence: Fence<'a>, lines: Vec<String> },
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Outside;

    for line in text.lines() {
        state = match state {
            ParseState::Outside => match opening_fence(line) {
                Some(fence) => ParseState::Inside {
                    fence,
                    lines: Vec::new(),
                },
                None => ParseState::Outside,
            },
            ParseState::Inside { fence, mut lines } => {
                if closes(line, &fence) {
                    blocks.push(FencedBlock {
                        info: fence.info,
                        lines,
                    });
                    ParseState::Outside
                } else {
                    lines.push(strip_indent(line, fence.indent).to_string());
                    ParseState::Inside { fence, lines }
                }
            }
        };
    }

    if let ParseState::Inside { fence, lines } = state {
        debug!(info = fence.info, lines = lines.len(), "dropping unterminated code block");
    }

    blocks
}

/// Leading spaces (at most three) and the remainder of the line
fn split_indent(line: &str) -> Option<(usize, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        None
    } else {
        Some((indent, &line[indent..]))
    }
}

fn opening_fence(line: &str) -> Option<Fence<'_>> {
    let (indent, rest) = split_indent(line)?;
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }

    // Both markers are one byte wide
    let info = rest[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }

    Some(Fence {
        marker,
        len,
        indent,
        info,
    })
}

fn closes(line: &str, fence: &Fence<'_>) -> bool {
    let Some((_, rest)) = split_indent(line) else {
        return false;
    };
    let len = rest.chars().take_while(|c| *c == fence.marker).count();
    len >= fence.len && rest[len..].trim().is_empty()
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let spaces = line.len() - line.trim_start_matches(' ').len();
    &line[spaces.min(indent)..]
}

// ============================================================================
// Heuristics
// ============================================================================

/// A tiny script whose only job is to run other script files
fn is_runner_script(lines: &[String]) -> bool {
    let effective: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    if effective.is_empty() || effective.len() > 2 {
        return false;
    }

    effective.iter().any(|line| {
        (line.contains("chmod") && line.contains(".sh"))
            || (line.starts_with("./") && line.contains(".sh"))
    })
}

/// File stem named by a leading comment such as `# file: setup.sh`
fn filename_hint(lines: &[String]) -> Option<String> {
    let first = lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty() && !l.starts_with("#!"))?;

    let comment = first
        .strip_prefix("//")
        .or_else(|| first.strip_prefix('#'))?
        .trim();

    let lowered = comment.to_ascii_lowercase();
    let mut rest = comment;
    for label in ["filename:", "file:", "name:"] {
        if lowered.starts_with(label) {
            rest = comment[label.len()..].trim();
            break;
        }
    }

    let token = rest.split_whitespace().next()?.trim_end_matches(':');
    let file = token.rsplit('/').next().unwrap_or(token);
    let (stem, ext) = file.rsplit_once('.')?;

    let valid_stem = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    let valid_ext = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());

    if valid_stem && valid_ext {
        Some(stem.to_string())
    } else {
        None
    }
}
