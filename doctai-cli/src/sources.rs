//! Loading documentation from local files and directories

use doctai_agent::DocumentSource;
use doctai_error::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions picked up when a directory is given
const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "txt"];

/// Read every path into a `DocumentSource`, in the order given.
///
/// A directory contributes its documentation files (non-recursive, sorted by
/// name). Ending up with nothing to test is a `NoSources` error.
pub fn load(paths: &[PathBuf]) -> Result<Vec<DocumentSource>> {
    let mut sources = Vec::new();

    for path in paths {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::file_not_found(path.display().to_string()),
            _ => Error::from(e).with_context("path", path.display().to_string()),
        })?;

        if metadata.is_dir() {
            for file in doc_files(path)? {
                sources.push(read_source(&file)?);
            }
        } else {
            sources.push(read_source(path)?);
        }
    }

    if sources.is_empty() {
        return Err(Error::no_sources().with_operation("sources::load"));
    }

    info!(count = sources.len(), "loaded documentation");
    Ok(sources)
}

fn doc_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::from(e)
            .with_operation("sources::doc_files")
            .with_context("path", dir.display().to_string())
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_doc_file(p))
        .collect();
    files.sort();

    debug!(dir = %dir.display(), files = files.len(), "scanned directory");
    Ok(files)
}

fn is_doc_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DOC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn read_source(path: &Path) -> Result<DocumentSource> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        let err = match e.kind() {
            std::io::ErrorKind::InvalidData => {
                Error::new(ErrorKind::ConfigInvalid, "documentation is not valid UTF-8")
            }
            _ => Error::from(e),
        };
        err.with_operation("sources::read")
            .with_context("path", path.display().to_string())
    })?;

    debug!(path = %path.display(), chars = content.len(), "read documentation");
    Ok(DocumentSource::new(path.display().to_string(), content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_files_in_given_order() {
        let tmp = tempfile::tempdir().unwrap();
        let b = tmp.path().join("b.md");
        let a = tmp.path().join("a.md");
        std::fs::write(&b, "# B").unwrap();
        std::fs::write(&a, "# A").unwrap();

        let sources = load(&[b.clone(), a.clone()]).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, b.display().to_string());
        assert_eq!(sources[0].content, "# B");
        assert_eq!(sources[1].content, "# A");
    }

    #[test]
    fn test_directory_contributes_sorted_doc_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("zeta.md"), "z").unwrap();
        std::fs::write(tmp.path().join("alpha.RST"), "a").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "n").unwrap();
        std::fs::write(tmp.path().join("build.sh"), "echo").unwrap();
        std::fs::create_dir(tmp.path().join("nested.md")).unwrap();

        let sources = load(&[tmp.path().to_path_buf()]).unwrap();
        let contents: Vec<&str> = sources.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "n", "z"]);
    }

    #[test]
    fn test_missing_path() {
        let err = load(&[PathBuf::from("/definitely/not/here.md")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_nothing_to_test() {
        let err = load(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSources);

        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.rs"), "fn main() {}").unwrap();
        let err = load(&[tmp.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSources);
    }
}
