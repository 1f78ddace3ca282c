//! Working directory management for test runs.
//!
//! A run's directory is created once and kept after the run so the generated
//! scripts can be inspected. Nothing here ever deletes it.

use doctai_error::{Error, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::debug;

const SOURCE_ID_MAX_CHARS: usize = 50;
const SUFFIX_LEN: usize = 6;

/// A working directory that outlives the run that created it
#[derive(Debug, Clone)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Use `root` when given (creating it if needed), otherwise create a fresh
    /// `doctai_*` directory under the system temp dir.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let path = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    Error::work_dir_failed(root.display().to_string(), "cannot create directory")
                        .with_operation("workdir::create")
                        .set_source(e)
                })?;
                root.to_path_buf()
            }
            None => tempfile::Builder::new()
                .prefix("doctai_")
                .tempdir()
                .map_err(|e| {
                    Error::work_dir_failed(
                        std::env::temp_dir().display().to_string(),
                        "cannot create temporary directory",
                    )
                    .with_operation("workdir::create")
                    .set_source(e)
                })?
                .keep(),
        };

        debug!(path = %path.display(), "working directory ready");
        Ok(Self { path })
    }

    /// A per-source sub-directory of a shared root
    pub fn create_for_source(root: &Path, source_id: &str) -> Result<Self> {
        Self::create(Some(&root.join(sanitize_source_id(source_id))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Reduce a source identifier to a safe file-name fragment.
///
/// Keeps `[A-Za-z0-9_.-]`, maps everything else to `_`, trims underscores and
/// keeps the last 50 characters, where paths and URLs carry their most
/// specific part.
pub fn sanitize_source_id(id: &str) -> String {
    let mapped: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = mapped.trim_matches('_');
    let skip = trimmed.chars().count().saturating_sub(SOURCE_ID_MAX_CHARS);
    let tail: String = trimmed.chars().skip(skip).collect();
    let tail = tail.trim_matches('_');

    if tail.is_empty() {
        "doc".to_string()
    } else {
        tail.to_string()
    }
}

/// Lowercase alphanumeric suffix used to keep script names unique
pub fn random_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// `_gen-<source>-<stem>-<suffix><ext>`
pub fn script_file_name(source: &str, stem: &str, suffix: &str, extension: &str) -> String {
    format!("_gen-{}-{}-{}{}", source, stem, suffix, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_source_id() {
        assert_eq!(sanitize_source_id("docs/install guide.md"), "docs_install_guide.md");
        assert_eq!(
            sanitize_source_id("https://example.com/setup"),
            "https___example.com_setup"
        );
        assert_eq!(sanitize_source_id("///"), "doc");
        assert_eq!(sanitize_source_id(""), "doc");
    }

    #[test]
    fn test_sanitize_keeps_tail() {
        let long = format!("{}/README.md", "a".repeat(80));
        let sanitized = sanitize_source_id(&long);
        assert_eq!(sanitized.chars().count(), 50);
        assert!(sanitized.ends_with("_README.md"));
    }

    #[test]
    fn test_random_suffix() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_script_file_name() {
        assert_eq!(
            script_file_name("README.md", "setup", "abc123", ".sh"),
            "_gen-README.md-setup-abc123.sh"
        );
    }

    #[test]
    fn test_create_fresh_dir_is_kept() {
        let dir = WorkDir::create(None).unwrap();
        assert!(dir.path().is_dir());
        assert!(dir
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("doctai_")));
        std::fs::remove_dir_all(dir.path()).unwrap();
    }

    #[test]
    fn test_create_explicit_and_per_source() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("runs");

        let dir = WorkDir::create(Some(&root)).unwrap();
        assert_eq!(dir.path(), root.as_path());

        let per_source = WorkDir::create_for_source(&root, "docs/a b.md").unwrap();
        assert_eq!(per_source.path(), root.join("docs_a_b.md").as_path());
        assert!(per_source.path().is_dir());
    }

    #[test]
    fn test_create_fails_under_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        std::fs::write(&file, "x").unwrap();

        let err = WorkDir::create(Some(&file.join("sub"))).unwrap_err();
        assert_eq!(err.kind(), doctai_error::ErrorKind::WorkDirFailed);
    }
}
