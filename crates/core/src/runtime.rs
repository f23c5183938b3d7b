//! Per-workspace runtime configuration file
//!
//! The controller writes this JSON snapshot to
//! `~/.workspaces/state/<name>/runtime.json` on every `start` and mounts it
//! read-only at `/workspace/config/runtime.json`. The in-container agent is
//! its only other reader, so the schema lives here in the shared crate.
//!
//! Field names are part of the on-disk contract (lowerCamelCase).

use crate::errors::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root of `runtime.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFile {
    pub workspace: RuntimeWorkspace,
    pub ssh: RuntimeSsh,
    pub forwards: Vec<u16>,
    pub bootstrap: RuntimeBootstrap,
}

/// Workspace identity and repository settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeWorkspace {
    pub name: String,
    pub repo: RuntimeRepo,
}

/// Repository clone settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeRepo {
    pub remote: Option<String>,
    pub branch: String,
    #[serde(rename = "cloneArgs", default)]
    pub clone_args: Vec<String>,
}

/// SSH settings for the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSsh {
    pub port: u16,
    #[serde(rename = "selectedKey")]
    pub selected_key: Option<String>,
}

/// Bootstrap script list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeBootstrap {
    #[serde(default)]
    pub scripts: Vec<RuntimeScript>,
}

/// One bootstrap script entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeScript {
    pub path: String,
    pub source: ScriptSource,
}

/// Where a bootstrap script path is rooted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSource {
    /// Relative to the mounted project directory
    Project,
    /// Relative to the mounted `~/.workspaces` directory
    User,
}

impl RuntimeFile {
    /// Write the snapshot atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        crate::fsutil::write_json_atomic(path, self)
    }

    /// Read a snapshot; a missing file is an error (the controller always
    /// writes it before the container starts).
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| StateError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            StateError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}
