//! Mount parsing and normalization
//!
//! Declared mounts are `SOURCE:TARGET[:ro|:rw]` strings. A leading single
//! letter followed by an absolute path is treated as a Windows drive prefix
//! and folded into the source (`C:/data:/workspace/data:ro`). Any other
//! four-part form is rejected at the config boundary. Entries with fewer
//! than two parts are dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Mount access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Read-only
    Ro,
    /// Read-write
    Rw,
}

impl MountMode {
    /// Parse a declared mode. Anything that is not `ro` or `rw` is
    /// corrected to `rw` with a warning.
    fn parse_lenient(text: &str) -> Self {
        match text {
            "ro" => MountMode::Ro,
            "rw" => MountMode::Rw,
            other => {
                warn!("Unknown mount mode '{}', defaulting to rw", other);
                MountMode::Rw
            }
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountMode::Ro => write!(f, "ro"),
            MountMode::Rw => write!(f, "rw"),
        }
    }
}

/// A normalized bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Host source path; absolute after [`Mount::resolve_source`]
    pub source: String,
    /// Container target path
    pub target: String,
    /// Access mode
    pub mode: MountMode,
}

impl Mount {
    pub fn new(source: impl Into<String>, target: impl Into<String>, mode: MountMode) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode,
        }
    }

    /// Render as a `docker run -v` argument value.
    pub fn to_volume_arg(&self) -> String {
        format!("{}:{}:{}", self.source, self.target, self.mode)
    }

    /// Expand `~` against `home` and resolve relative sources against
    /// `base`. Drive-qualified sources (`C:/...`) pass through untouched.
    pub fn resolve_source(&mut self, base: &Path, home: &Path) {
        if is_drive_qualified(&self.source) {
            return;
        }
        let expanded = crate::fsutil::expand_tilde(&self.source, home);
        if expanded.is_relative() {
            self.source = base.join(expanded).display().to_string();
        } else {
            self.source = expanded.display().to_string();
        }
    }
}

fn is_drive_qualified(source: &str) -> bool {
    let mut chars = source.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), Some('/' | '\\')) if letter.is_ascii_alphabetic()
    )
}

/// Parse a single declared mount spec. Returns `None` (with a warning) for
/// malformed entries so one bad line does not fail the configuration.
pub fn parse_mount_spec(spec: &str) -> Option<Mount> {
    let parts: Vec<&str> = spec.split(':').collect();

    // Fold a Windows drive prefix back into the source before applying
    // arity rules.
    let (source, rest): (String, &[&str]) = if parts.len() >= 3
        && parts[0].len() == 1
        && parts[0].chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && parts[1].starts_with(['/', '\\'])
    {
        (format!("{}:{}", parts[0], parts[1]), &parts[2..])
    } else {
        match parts.split_first() {
            Some((first, rest)) if !rest.is_empty() => ((*first).to_string(), rest),
            _ => {
                warn!("Dropping mount '{}': expected SOURCE:TARGET[:mode]", spec);
                return None;
            }
        }
    };

    match rest {
        [target] => Some(Mount::new(source, *target, MountMode::Rw)),
        [target, mode] => Some(Mount::new(source, *target, MountMode::parse_lenient(mode))),
        _ => {
            warn!("Dropping mount '{}': too many ':' separators", spec);
            None
        }
    }
}

/// Parse many mount specs, dropping malformed entries.
pub fn parse_mount_specs(specs: &[String]) -> Vec<Mount> {
    specs.iter().filter_map(|s| parse_mount_spec(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_part_defaults_to_rw() {
        let m = parse_mount_spec("/tmp/data:/workspace/data").unwrap();
        assert_eq!(m.source, "/tmp/data");
        assert_eq!(m.target, "/workspace/data");
        assert_eq!(m.mode, MountMode::Rw);
    }

    #[test]
    fn three_part_with_mode() {
        let m = parse_mount_spec("/tmp/ro:/workspace/test-ro:ro").unwrap();
        assert_eq!(m.mode, MountMode::Ro);
        assert_eq!(m.to_volume_arg(), "/tmp/ro:/workspace/test-ro:ro");
    }

    #[test]
    fn unknown_mode_corrected_to_rw() {
        let m = parse_mount_spec("/a:/b:readonly").unwrap();
        assert_eq!(m.mode, MountMode::Rw);
    }

    #[test]
    fn windows_drive_source_with_mode() {
        let m = parse_mount_spec("C:/path:/container/path:ro").unwrap();
        assert_eq!(m.source, "C:/path");
        assert_eq!(m.target, "/container/path");
        assert_eq!(m.mode, MountMode::Ro);
    }

    #[test]
    fn windows_drive_source_without_mode() {
        let m = parse_mount_spec("D:/data:/workspace/data").unwrap();
        assert_eq!(m.source, "D:/data");
        assert_eq!(m.target, "/workspace/data");
        assert_eq!(m.mode, MountMode::Rw);
    }

    #[test]
    fn four_parts_without_drive_prefix_dropped() {
        assert!(parse_mount_spec("/a:/b:/c:ro").is_none());
    }

    #[test]
    fn single_part_dropped() {
        assert!(parse_mount_spec("/only-source").is_none());
        assert!(parse_mount_spec("").is_none());
    }

    #[test]
    fn relative_source_resolved_against_base() {
        let mut m = parse_mount_spec("data/fixtures:/workspace/fixtures").unwrap();
        m.resolve_source(Path::new("/home/u/project"), Path::new("/home/u"));
        assert_eq!(m.source, "/home/u/project/data/fixtures");
    }

    #[test]
    fn tilde_source_expanded_against_home() {
        let mut m = parse_mount_spec("~/shared:/workspace/shared:ro").unwrap();
        m.resolve_source(Path::new("/home/u/project"), Path::new("/home/u"));
        assert_eq!(m.source, "/home/u/shared");
    }

    #[test]
    fn drive_source_left_alone_by_resolution() {
        let mut m = parse_mount_spec("C:/path:/container/path").unwrap();
        m.resolve_source(Path::new("/base"), Path::new("/home/u"));
        assert_eq!(m.source, "C:/path");
    }

    #[test]
    fn parse_many_drops_bad_entries() {
        let specs = vec![
            "/a:/b".to_string(),
            "broken".to_string(),
            "/c:/d:ro".to_string(),
        ];
        let mounts = parse_mount_specs(&specs);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].target, "/b");
        assert_eq!(mounts[1].mode, MountMode::Ro);
    }
}
