//! Filesystem helpers
//!
//! Small, widely used primitives: directory creation, atomic JSON writes,
//! tolerant JSON reads, and executable-file listing for bootstrap script
//! directories.

use crate::errors::{Result, StateError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::trace;

fn io_err(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Create `dir` and any missing parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    Ok(())
}

/// Whether `path` exists (file, directory, or symlink target).
pub fn path_exists(path: &Path) -> bool {
    path.exists()
}

/// Serialize `value` as pretty JSON and write it atomically: the content
/// goes to a sibling temp file which is then renamed over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| StateError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let tmp = sibling_temp_path(path);
    std::fs::write(&tmp, json.as_bytes()).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    trace!("wrote {} atomically", path.display());
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(&format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

/// Read and deserialize JSON from `path`; a missing file yields `default()`.
pub fn read_json_or<T, F>(path: &Path, default: F) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(default()),
        Err(e) => return Err(io_err(path, e).into()),
    };

    serde_json::from_slice(&bytes)
        .map_err(|e| {
            StateError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

/// List plain files directly under `dir` whose mode has any execute bit
/// set, sorted ascending by file name. A missing directory yields an empty
/// list.
pub fn list_executable_files(dir: &Path) -> Result<Vec<PathBuf>> {
    use std::os::unix::fs::PermissionsExt;

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e).into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let meta = entry.metadata().map_err(|e| io_err(&entry.path(), e))?;
        if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Expand a leading `~/` against the given home directory; other paths pass
/// through unchanged.
pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::os::unix::fs::PermissionsExt;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sample.json");

        let value = Sample {
            name: "demo".to_string(),
            count: 3,
        };
        write_json_atomic(&path, &value).unwrap();

        let loaded: Sample = read_json_or(&path, || panic!("file should exist")).unwrap();
        assert_eq!(loaded, value);

        // No temp file left behind
        let siblings: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn read_json_missing_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Sample = read_json_or(&dir.path().join("absent.json"), || Sample {
            name: "fallback".to_string(),
            count: 0,
        })
        .unwrap();
        assert_eq!(loaded.name, "fallback");
    }

    #[test]
    fn read_json_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let result: Result<Sample> = read_json_or(&path, || panic!("should not default"));
        assert!(result.is_err());
    }

    #[test]
    fn executable_listing_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();

        for (name, mode) in [("02.sh", 0o755), ("01.sh", 0o700), ("readme.txt", 0o644)] {
            let p = dir.path().join(name);
            std::fs::write(&p, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&p, std::fs::Permissions::from_mode(mode)).unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let files = list_executable_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01.sh", "02.sh"]);
    }

    #[test]
    fn executable_listing_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = list_executable_files(&dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn tilde_expansion() {
        let home = Path::new("/home/tester");
        assert_eq!(expand_tilde("~/x/y", home), PathBuf::from("/home/tester/x/y"));
        assert_eq!(expand_tilde("~", home), PathBuf::from("/home/tester"));
        assert_eq!(expand_tilde("/abs/path", home), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/path", home), PathBuf::from("rel/path"));
    }
}
