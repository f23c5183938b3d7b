//! Workspace identity and host directory layout
//!
//! A workspace's name is the basename of the directory holding its
//! `.workspace.yml` (or an explicit override). Everything else is derived:
//! the container name, the named volumes, and the per-workspace state
//! directory under `~/.workspaces/state/<name>`.

use crate::errors::{ConfigError, Result};
use std::path::{Path, PathBuf};

/// Image tag shared by every workspace container
pub const IMAGE_TAG: &str = "workspace:latest";

/// Prefix for workspace container names
pub const CONTAINER_PREFIX: &str = "workspace-";

/// Immutable identity of a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceIdentity {
    /// Workspace name, unique per host
    pub name: String,
    /// Container name, `workspace-<name>`
    pub container_name: String,
    /// Image tag (shared across workspaces)
    pub image_tag: String,
}

impl WorkspaceIdentity {
    /// Derive an identity from a workspace name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            container_name: format!("{}{}", CONTAINER_PREFIX, name),
            image_tag: IMAGE_TAG.to_string(),
            name,
        }
    }

    /// Derive an identity from the directory containing the project config,
    /// with an optional explicit override.
    pub fn from_config_dir(dir: &Path, override_name: Option<&str>) -> Result<Self> {
        if let Some(name) = override_name {
            return Ok(Self::new(name));
        }
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ConfigError::Invalid {
                message: format!(
                    "Cannot derive a workspace name from directory {}",
                    dir.display()
                ),
            })?;
        Ok(Self::new(name))
    }

    /// The three named volumes backing this workspace.
    pub fn volume_names(&self) -> [String; 3] {
        [
            format!("{}-home", self.container_name),
            format!("{}-docker", self.container_name),
            format!("{}-cache", self.container_name),
        ]
    }
}

/// Host-side directory layout rooted at `~/.workspaces`
#[derive(Debug, Clone)]
pub struct HostLayout {
    /// The invoking user's home directory
    pub home: PathBuf,
    /// `~/.workspaces`
    pub root: PathBuf,
}

impl HostLayout {
    /// Resolve the layout from the invoking user's home directory.
    pub fn discover() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| ConfigError::Invalid {
            message: "Cannot determine the home directory".to_string(),
        })?;
        Ok(Self::from_home(home))
    }

    pub fn from_home(home: PathBuf) -> Self {
        let root = home.join(".workspaces");
        Self { home, root }
    }

    /// `~/.workspaces/config.yml`
    pub fn user_config_path(&self) -> PathBuf {
        self.root.join("config.yml")
    }

    /// `~/.workspaces/userscripts`
    pub fn userscripts_dir(&self) -> PathBuf {
        self.root.join("userscripts")
    }

    /// `~/.workspaces/state`
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// `~/.workspaces/state/state.json`
    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    /// `~/.workspaces/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Per-workspace state paths under `~/.workspaces/state/<name>`.
    pub fn workspace_state(&self, name: &str) -> WorkspaceStatePaths {
        let root = self.state_dir().join(name);
        WorkspaceStatePaths {
            ssh_dir: root.join("ssh"),
            key_path: root.join("ssh").join("id_ed25519"),
            runtime_config_path: root.join("runtime.json"),
            root,
        }
    }

    /// Log file for one init run: `~/.workspaces/logs/<name>-<stamp>.log`.
    pub fn init_log_path(&self, name: &str, now: chrono::DateTime<chrono::Utc>) -> PathBuf {
        let stamp = now.format("%Y-%m-%dT%H-%M-%S");
        self.logs_dir().join(format!("{}-{}.log", name, stamp))
    }
}

/// Per-workspace host-side state directory
#[derive(Debug, Clone)]
pub struct WorkspaceStatePaths {
    /// `~/.workspaces/state/<name>`
    pub root: PathBuf,
    /// `<root>/ssh`
    pub ssh_dir: PathBuf,
    /// `<root>/ssh/id_ed25519`
    pub key_path: PathBuf,
    /// `<root>/runtime.json`
    pub runtime_config_path: PathBuf,
}

/// Locate the workspace image build context packaged with the tool.
///
/// `WORKSPACE_BUILD_CONTEXT` overrides; otherwise the `image/` directory
/// next to the running executable is used.
pub fn build_context_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("WORKSPACE_BUILD_CONTEXT") {
        return Ok(PathBuf::from(dir));
    }
    let exe = std::env::current_exe().map_err(ConfigError::Io)?;
    let base = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("image"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_derives_container_and_image() {
        let id = WorkspaceIdentity::new("api");
        assert_eq!(id.name, "api");
        assert_eq!(id.container_name, "workspace-api");
        assert_eq!(id.image_tag, "workspace:latest");
    }

    #[test]
    fn identity_from_config_dir_uses_basename() {
        let id = WorkspaceIdentity::from_config_dir(Path::new("/home/u/projects/shop"), None)
            .unwrap();
        assert_eq!(id.name, "shop");
    }

    #[test]
    fn identity_override_wins() {
        let id =
            WorkspaceIdentity::from_config_dir(Path::new("/home/u/projects/shop"), Some("alt"))
                .unwrap();
        assert_eq!(id.name, "alt");
        assert_eq!(id.container_name, "workspace-alt");
    }

    #[test]
    fn volume_names_follow_container() {
        let id = WorkspaceIdentity::new("api");
        assert_eq!(
            id.volume_names(),
            [
                "workspace-api-home".to_string(),
                "workspace-api-docker".to_string(),
                "workspace-api-cache".to_string(),
            ]
        );
    }

    #[test]
    fn layout_paths() {
        let layout = HostLayout::from_home(PathBuf::from("/home/tester"));
        assert_eq!(
            layout.state_file(),
            PathBuf::from("/home/tester/.workspaces/state/state.json")
        );
        let ws = layout.workspace_state("api");
        assert_eq!(
            ws.key_path,
            PathBuf::from("/home/tester/.workspaces/state/api/ssh/id_ed25519")
        );
        assert_eq!(
            ws.runtime_config_path,
            PathBuf::from("/home/tester/.workspaces/state/api/runtime.json")
        );
    }

    #[test]
    fn init_log_name_has_timestamp() {
        use chrono::TimeZone;
        let layout = HostLayout::from_home(PathBuf::from("/home/tester"));
        let now = chrono::Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            layout.init_log_path("api", now),
            PathBuf::from("/home/tester/.workspaces/logs/api-2026-03-14T09-26-53.log")
        );
    }
}
