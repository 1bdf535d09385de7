//! File helpers shared by every pass.
//!
//! Rewrites go through a temporary file in the same directory that is persisted over the
//! original only once the new content is complete, so a failure halfway through a pass leaves
//! the previous version of the file untouched.

use crate::errors::FileError;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Reads a whole file as UTF-8 text.
pub fn read_text(path: &Path) -> Result<String, FileError> {
    fs::read_to_string(path).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a file and splits it into lines without their terminators.
pub fn read_lines(path: &Path) -> Result<Vec<String>, FileError> {
    Ok(read_text(path)?.lines().map(str::to_string).collect())
}

/// Replaces `path` with `contents` atomically.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), FileError> {
    let write_err = |source| FileError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Writes `lines` joined by `\n`, with a trailing newline.
pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), FileError> {
    let mut out = lines.join("\n");
    out.push('\n');
    write_atomic(path, out.as_bytes())
}

/// Reads `path` as lines, hands them to `edit` and writes the result back when it differs.
///
/// Returns whether the file changed. If `edit` fails nothing is written.
pub fn rewrite_lines<E, F>(path: &Path, edit: F) -> Result<bool, E>
where
    E: From<FileError>,
    F: FnOnce(&[String]) -> Result<Vec<String>, E>,
{
    let lines = read_lines(path)?;
    let edited = edit(&lines)?;
    if edited == lines {
        return Ok(false);
    }
    write_lines(path, &edited)?;
    Ok(true)
}

/// Removes a file, mapping the error to [`FileError::Remove`].
pub fn remove(path: &Path) -> Result<(), FileError> {
    fs::remove_file(path).map_err(|source| FileError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_keeps_original_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.smali");
        fs::write(&path, ".class public LA;\n").unwrap();

        let result: Result<bool, FileError> = rewrite_lines(&path, |_| {
            Err(FileError::Write {
                path: path.clone(),
                source: std::io::Error::other("boom"),
            })
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), ".class public LA;\n");
    }

    #[test]
    fn rewrite_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.smali");
        fs::write(&path, "one\ntwo\n").unwrap();

        let unchanged: Result<bool, FileError> = rewrite_lines(&path, |lines| Ok(lines.to_vec()));
        assert!(!unchanged.unwrap());

        let changed: Result<bool, FileError> = rewrite_lines(&path, |lines| {
            let mut out = lines.to_vec();
            out.push("three".into());
            Ok(out)
        });
        assert!(changed.unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\nthree\n");
    }
}
