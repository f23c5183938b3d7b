//! Configuration discovery, merging, and normalization
//!
//! Two declarative files feed the resolver: the project's `.workspace.yml`
//! (found by walking up from the invocation directory) and the user's
//! `~/.workspaces/config.yml`. Both share one schema; the user file adds
//! the `ssh` section. Everything downstream of this module consumes the
//! canonical [`ResolvedConfig`] only: forwards expanded, mounts resolved
//! to absolute sources, bootstrap scripts tagged with their origin.
//!
//! Merge rules:
//! - `forwards` and `mounts` concatenate, project first, user second
//! - `bootstrap.scripts` concatenate, each entry tagged `project` or `user`
//! - `repo` is shallow-merged, user fields over project fields
//! - `mountAgentsCredentials` from the user file overrides the project

use crate::errors::{ConfigError, Result};
use crate::fsutil;
use crate::mount::{self, Mount, MountMode};
use crate::ports::{self, ForwardSpec};
use crate::process::Cmd;
use crate::runtime::{RuntimeScript, ScriptSource};
use crate::workspace::{HostLayout, WorkspaceIdentity, WorkspaceStatePaths};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name looked up in each directory on the discovery walk
pub const CONFIG_FILE_NAME: &str = ".workspace.yml";

/// Default branch when the config names a remote but no branch
pub const DEFAULT_BRANCH: &str = "main";

/// Well-known credential files appended as `rw` mounts when
/// `mountAgentsCredentials` is enabled and the file exists on the host.
const AGENT_CREDENTIAL_PATHS: &[(&str, &str)] = &[
    (".codex/auth.json", "/home/workspace/.codex/auth.json"),
    (
        ".local/share/opencode/auth.json",
        "/home/workspace/.local/share/opencode/auth.json",
    ),
    (".claude/.credentials.json", "/home/workspace/.claude/.credentials.json"),
];

/// Raw declarative configuration, shared by project and user files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub repo: Option<RawRepo>,
    #[serde(default)]
    pub forwards: Vec<ForwardSpec>,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub bootstrap: Option<RawBootstrap>,
    #[serde(rename = "mountAgentsCredentials", default)]
    pub mount_agents_credentials: Option<bool>,
    /// Only meaningful in the user file; tolerated elsewhere
    #[serde(default)]
    pub ssh: Option<RawSsh>,
}

/// Repository section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRepo {
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(rename = "cloneArgs", default)]
    pub clone_args: Option<Vec<String>>,
}

/// Bootstrap section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBootstrap {
    #[serde(default)]
    pub scripts: Vec<ScriptSpec>,
}

/// One declared bootstrap script: a bare path, or a `{path, source}` object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptSpec {
    Path(String),
    Tagged {
        path: String,
        #[serde(default)]
        source: Option<ScriptSource>,
    },
}

/// SSH section of the user configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSsh {
    #[serde(rename = "defaultKey", default)]
    pub default_key: Option<String>,
    /// Pattern -> key path, in declaration order
    #[serde(default)]
    pub repos: IndexMap<String, String>,
}

/// Canonical configuration handed to lifecycle operations
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub identity: WorkspaceIdentity,
    /// Directory containing the project `.workspace.yml`
    pub config_dir: PathBuf,
    pub repo: ResolvedRepo,
    /// Expanded, validated forward ports, in declared order
    pub forwards: Vec<u16>,
    /// Normalized mounts with absolute sources
    pub mounts: Vec<Mount>,
    /// Bootstrap scripts in execution order, tagged by origin
    pub bootstrap_scripts: Vec<RuntimeScript>,
    /// SSH settings carried over from the user configuration
    pub ssh: RawSsh,
    /// Per-workspace host state paths
    pub state: WorkspaceStatePaths,
    /// Build context of the shared workspace image
    pub build_context: PathBuf,
}

/// Repository settings after merge and defaulting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRepo {
    pub remote: Option<String>,
    pub branch: String,
    pub clone_args: Vec<String>,
}

/// Ask the VCS for the repository root; fall back to `cwd` when the
/// invocation directory is not inside a repository.
pub async fn discover_repo_root(cwd: &Path) -> PathBuf {
    let result = Cmd::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(cwd)
        .ignore_failure()
        .run_captured()
        .await;

    match result {
        Ok(out) if out.success() => {
            let root = out.stdout.trim();
            if root.is_empty() {
                cwd.to_path_buf()
            } else {
                PathBuf::from(root)
            }
        }
        _ => cwd.to_path_buf(),
    }
}

/// Walk up from `start` looking for [`CONFIG_FILE_NAME`].
///
/// The walk stops after checking the repository root, the host home, or the
/// filesystem root, whichever comes first.
pub fn find_workspace_dir(start: &Path, repo_root: &Path, home: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(CONFIG_FILE_NAME).is_file() {
            debug!("Found {} in {}", CONFIG_FILE_NAME, dir.display());
            return Ok(dir);
        }
        if dir == repo_root || dir == home {
            break;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }

    Err(ConfigError::Missing {
        start: start.display().to_string(),
        stop: dir.display().to_string(),
    }
    .into())
}

const USER_CONFIG_TEMPLATE: &str = "\
# Workspace user configuration.
#
# Applied on top of every project's .workspace.yml.
#
# forwards:
#   - 9229
# mounts:
#   - ~/shared:/workspace/shared:ro
# bootstrap:
#   scripts:
#     - userscripts
# ssh:
#   defaultKey: ~/.ssh/id_ed25519
#   repos:
#     \"git@github.com:acme/*\": ~/.ssh/id_work
";

/// Create `~/.workspaces/{userscripts/, config.yml}` on first use.
/// Idempotent: existing files are left untouched.
pub fn ensure_user_config(layout: &HostLayout) -> Result<()> {
    fsutil::ensure_dir(&layout.userscripts_dir())?;
    let path = layout.user_config_path();
    if !path.exists() {
        std::fs::write(&path, USER_CONFIG_TEMPLATE).map_err(ConfigError::Io)?;
        debug!("Wrote user config template to {}", path.display());
    }
    Ok(())
}

/// Load and parse the project configuration from `dir`.
///
/// An empty or null document is rejected: a project opted into workspaces
/// by creating the file, so silently treating it as defaults would mask a
/// truncated write.
pub fn load_project_config(dir: &Path) -> Result<RawConfig> {
    let path = dir.join(CONFIG_FILE_NAME);
    let text = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
    parse_config(&text, &path)
}

/// Load the user configuration. A missing file yields defaults, and so
/// does a null document: the generated template starts out all comments.
pub fn load_user_config(layout: &HostLayout) -> Result<RawConfig> {
    let path = layout.user_config_path();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RawConfig::default()),
        Err(e) => return Err(ConfigError::Io(e).into()),
    };

    let value: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parsing {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    if value.is_null() {
        return Ok(RawConfig::default());
    }
    serde_yaml::from_value(value)
        .map_err(|e| {
            ConfigError::Parsing {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

fn parse_config(text: &str, path: &Path) -> Result<RawConfig> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parsing {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    if value.is_null() {
        return Err(ConfigError::Invalid {
            message: format!("{} is empty", path.display()),
        }
        .into());
    }

    serde_yaml::from_value(value)
        .map_err(|e| {
            ConfigError::Parsing {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

/// Options for [`resolve_config`]
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Explicit workspace name, overriding the config-directory basename
    pub workspace_name_override: Option<String>,
    /// Build context override; defaults to the packaged image directory
    pub build_context: Option<PathBuf>,
}

/// Merge project and user configuration and normalize into the canonical
/// form consumed by lifecycle operations.
pub fn resolve_config(
    project: &RawConfig,
    user: &RawConfig,
    config_dir: &Path,
    layout: &HostLayout,
    options: &ResolveOptions,
) -> Result<ResolvedConfig> {
    let identity = WorkspaceIdentity::from_config_dir(
        config_dir,
        options.workspace_name_override.as_deref(),
    )?;

    // Repo: user fields over project fields, branch defaulted.
    let project_repo = project.repo.clone().unwrap_or_default();
    let user_repo = user.repo.clone().unwrap_or_default();
    let repo = ResolvedRepo {
        remote: user_repo.remote.or(project_repo.remote),
        branch: user_repo
            .branch
            .or(project_repo.branch)
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        clone_args: user_repo
            .clone_args
            .or(project_repo.clone_args)
            .unwrap_or_default(),
    };

    // Forwards: project first, user second, expanded in declared order.
    let mut forward_specs = project.forwards.clone();
    forward_specs.extend(user.forwards.iter().cloned());
    let forwards = ports::expand_forwards(&forward_specs);

    // Mounts: project first, user second; relative sources resolve against
    // the project config directory either way.
    let mut mount_specs = project.mounts.clone();
    mount_specs.extend(user.mounts.iter().cloned());
    let mut mounts = mount::parse_mount_specs(&mount_specs);
    for m in &mut mounts {
        m.resolve_source(config_dir, &layout.home);
    }

    let mount_agents_credentials = user
        .mount_agents_credentials
        .or(project.mount_agents_credentials)
        .unwrap_or(false);
    if mount_agents_credentials {
        append_credential_mounts(&mut mounts, &layout.home);
    }

    let mut bootstrap_scripts = Vec::new();
    collect_scripts(&mut bootstrap_scripts, project, ScriptSource::Project);
    collect_scripts(&mut bootstrap_scripts, user, ScriptSource::User);

    let build_context = match &options.build_context {
        Some(dir) => dir.clone(),
        None => crate::workspace::build_context_dir()?,
    };

    Ok(ResolvedConfig {
        state: layout.workspace_state(&identity.name),
        identity,
        config_dir: config_dir.to_path_buf(),
        repo,
        forwards,
        mounts,
        bootstrap_scripts,
        ssh: user.ssh.clone().unwrap_or_default(),
        build_context,
    })
}

fn collect_scripts(out: &mut Vec<RuntimeScript>, config: &RawConfig, origin: ScriptSource) {
    let Some(bootstrap) = &config.bootstrap else {
        return;
    };
    for spec in &bootstrap.scripts {
        match spec {
            ScriptSpec::Path(path) => out.push(RuntimeScript {
                path: path.clone(),
                source: origin,
            }),
            ScriptSpec::Tagged { path, source } => out.push(RuntimeScript {
                path: path.clone(),
                source: source.unwrap_or(origin),
            }),
        }
    }
}

fn append_credential_mounts(mounts: &mut Vec<Mount>, home: &Path) {
    for (host_rel, target) in AGENT_CREDENTIAL_PATHS {
        let source = home.join(host_rel);
        if source.exists() {
            mounts.push(Mount::new(
                source.display().to_string(),
                (*target).to_string(),
                MountMode::Rw,
            ));
        } else {
            warn!(
                "Skipping credential mount {}: file does not exist",
                source.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout_in(dir: &Path) -> HostLayout {
        HostLayout::from_home(dir.to_path_buf())
    }

    fn resolve(
        project_yaml: &str,
        user_yaml: &str,
        config_dir: &Path,
        layout: &HostLayout,
    ) -> ResolvedConfig {
        let project: RawConfig = serde_yaml::from_str(project_yaml).unwrap();
        let user: RawConfig = serde_yaml::from_str(user_yaml).unwrap();
        let options = ResolveOptions {
            workspace_name_override: None,
            build_context: Some(PathBuf::from("/opt/workspace/image")),
        };
        resolve_config(&project, &user, config_dir, layout, &options).unwrap()
    }

    #[test]
    fn parse_full_project_config() {
        let raw: RawConfig = serde_yaml::from_str(
            r#"
            repo:
              remote: git@github.com:acme/api.git
              branch: develop
              cloneArgs: ["--depth", "1"]
            forwards:
              - 3000
              - "5000-5001"
            mounts:
              - /tmp/data:/workspace/data:ro
            bootstrap:
              scripts:
                - scripts/01.sh
                - path: scripts/02.sh
            mountAgentsCredentials: true
            "#,
        )
        .unwrap();

        let repo = raw.repo.unwrap();
        assert_eq!(repo.remote.as_deref(), Some("git@github.com:acme/api.git"));
        assert_eq!(repo.clone_args.unwrap(), vec!["--depth", "1"]);
        assert_eq!(raw.forwards.len(), 2);
        assert_eq!(raw.mount_agents_credentials, Some(true));
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let result: std::result::Result<RawConfig, _> =
            serde_yaml::from_str("fowards:\n  - 3000\n");
        assert!(result.is_err());
    }

    #[test]
    fn merge_concatenates_project_before_user() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();

        let resolved = resolve(
            r#"
            forwards: [3000]
            mounts: ["/p/src:/workspace/p"]
            bootstrap:
              scripts: [01.sh]
            "#,
            r#"
            forwards: [9229]
            mounts: ["/u/shared:/workspace/shared:ro"]
            bootstrap:
              scripts: [userscripts/setup.sh]
            "#,
            &config_dir,
            &layout,
        );

        assert_eq!(resolved.forwards, vec![3000, 9229]);
        assert_eq!(resolved.mounts[0].target, "/workspace/p");
        assert_eq!(resolved.mounts[1].target, "/workspace/shared");
        assert_eq!(
            resolved.bootstrap_scripts,
            vec![
                RuntimeScript {
                    path: "01.sh".to_string(),
                    source: ScriptSource::Project
                },
                RuntimeScript {
                    path: "userscripts/setup.sh".to_string(),
                    source: ScriptSource::User
                },
            ]
        );
    }

    #[test]
    fn repo_shallow_merge_user_over_project() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();

        let resolved = resolve(
            r#"
            repo:
              remote: git@github.com:acme/api.git
              branch: develop
            "#,
            r#"
            repo:
              branch: main-fork
            "#,
            &config_dir,
            &layout,
        );

        assert_eq!(
            resolved.repo.remote.as_deref(),
            Some("git@github.com:acme/api.git")
        );
        assert_eq!(resolved.repo.branch, "main-fork");
    }

    #[test]
    fn branch_defaults_to_main() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();

        let resolved = resolve(
            "repo:\n  remote: git@github.com:acme/api.git\n",
            "forwards: []\n",
            &config_dir,
            &layout,
        );
        assert_eq!(resolved.repo.branch, "main");
    }

    #[test]
    fn relative_mount_sources_resolve_against_config_dir() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();

        let resolved = resolve(
            "mounts: [\"fixtures:/workspace/fixtures\"]\n",
            "forwards: []\n",
            &config_dir,
            &layout,
        );
        assert_eq!(
            resolved.mounts[0].source,
            config_dir.join("fixtures").display().to_string()
        );
    }

    #[test]
    fn credential_mounts_only_when_present() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();

        // Only one of the three well-known files exists.
        let codex = home.path().join(".codex");
        fs::create_dir_all(&codex).unwrap();
        fs::write(codex.join("auth.json"), "{}").unwrap();

        let resolved = resolve(
            "mountAgentsCredentials: true\n",
            "forwards: []\n",
            &config_dir,
            &layout,
        );

        assert_eq!(resolved.mounts.len(), 1);
        assert_eq!(resolved.mounts[0].mode, MountMode::Rw);
        assert!(resolved.mounts[0].source.ends_with(".codex/auth.json"));
    }

    #[test]
    fn user_overrides_mount_agents_credentials_off() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();
        let codex = home.path().join(".codex");
        fs::create_dir_all(&codex).unwrap();
        fs::write(codex.join("auth.json"), "{}").unwrap();

        let resolved = resolve(
            "mountAgentsCredentials: true\n",
            "mountAgentsCredentials: false\n",
            &config_dir,
            &layout,
        );
        assert!(resolved.mounts.is_empty());
    }

    #[test]
    fn find_workspace_dir_walks_up() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("repo/project");
        let nested = project.join("src/deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(project.join(CONFIG_FILE_NAME), "forwards: []\n").unwrap();

        let found =
            find_workspace_dir(&nested, root.path(), Path::new("/nonexistent-home")).unwrap();
        assert_eq!(found, project);
    }

    #[test]
    fn find_workspace_dir_stops_at_repo_root() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("repo");
        let nested = repo.join("src");
        fs::create_dir_all(&nested).unwrap();
        // Config above the repo root must not be found.
        fs::write(root.path().join(CONFIG_FILE_NAME), "forwards: []\n").unwrap();

        let result = find_workspace_dir(&nested, &repo, Path::new("/nonexistent-home"));
        assert!(result.is_err());
    }

    #[test]
    fn ensure_user_config_is_idempotent() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());

        ensure_user_config(&layout).unwrap();
        assert!(layout.user_config_path().is_file());
        assert!(layout.userscripts_dir().is_dir());

        // Second call leaves a user edit in place.
        fs::write(layout.user_config_path(), "forwards: [9229]\n").unwrap();
        ensure_user_config(&layout).unwrap();
        let text = fs::read_to_string(layout.user_config_path()).unwrap();
        assert_eq!(text, "forwards: [9229]\n");
    }

    #[test]
    fn empty_project_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let result = load_project_config(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn all_comment_user_config_defaults() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        ensure_user_config(&layout).unwrap();

        // The generated template is comments only; it must load as empty.
        let config = load_user_config(&layout).unwrap();
        assert!(config.forwards.is_empty());
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn missing_user_config_defaults() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config = load_user_config(&layout).unwrap();
        assert!(config.forwards.is_empty());
        assert!(config.ssh.is_none());
    }

    #[test]
    fn resolve_round_trips_through_serialization() {
        let home = tempfile::tempdir().unwrap();
        let layout = layout_in(home.path());
        let config_dir = home.path().join("proj");
        fs::create_dir_all(&config_dir).unwrap();

        let yaml = r#"
        repo:
          remote: git@github.com:acme/api.git
        forwards: [3000, "5000-5001"]
        mounts: ["/tmp/a:/workspace/a"]
        bootstrap:
          scripts: [setup.sh]
        "#;
        let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
        let reserialized = serde_yaml::to_string(&raw).unwrap();
        let reparsed: RawConfig = serde_yaml::from_str(&reserialized).unwrap();

        let options = ResolveOptions {
            workspace_name_override: None,
            build_context: Some(PathBuf::from("/opt/image")),
        };
        let user = RawConfig::default();
        let a = resolve_config(&raw, &user, &config_dir, &layout, &options).unwrap();
        let b = resolve_config(&reparsed, &user, &config_dir, &layout, &options).unwrap();

        assert_eq!(a.forwards, b.forwards);
        assert_eq!(a.mounts, b.mounts);
        assert_eq!(a.bootstrap_scripts, b.bootstrap_scripts);
        assert_eq!(a.repo, b.repo);
    }
}
