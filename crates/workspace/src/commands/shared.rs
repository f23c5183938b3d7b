//! Helpers shared by command implementations

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use workspace_core::config::{self, ResolveOptions, ResolvedConfig, CONFIG_FILE_NAME};
use workspace_core::docker::Docker;
use workspace_core::retry::{self, JitterStrategy, RetryConfig};
use workspace_core::state::StateStore;
use workspace_core::workspace::{HostLayout, WorkspaceIdentity};

/// Everything a command typically needs in one place.
pub struct CommandContext {
    pub layout: HostLayout,
    pub store: StateStore,
}

impl CommandContext {
    /// Discover the host layout and make sure the user configuration
    /// skeleton exists.
    pub fn establish() -> Result<Self> {
        let layout = HostLayout::discover()?;
        config::ensure_user_config(&layout)?;
        let store = StateStore::new(layout.clone());
        Ok(Self { layout, store })
    }
}

/// Ping the Docker daemon with a short retry budget. A daemon that is
/// still coming up after boot answers on the second or third attempt; a
/// missing one fails fast enough to keep the error actionable.
pub async fn ping_docker(docker: &Docker) -> Result<()> {
    let config = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(2),
        jitter: JitterStrategy::EqualJitter,
    };
    retry::retry_async(&config, "docker ping", || docker.ping())
        .await
        .context("Docker daemon is not reachable")?;
    Ok(())
}

/// Locate the project config directory for a named workspace.
///
/// The state record's `configDir` wins when it still holds a config file
/// (the workspace may be started from anywhere once known); otherwise the
/// discovery walk runs from `path` or the current directory.
pub async fn locate_config_dir(
    ctx: &CommandContext,
    name: &str,
    path: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(record) = ctx.store.get_workspace(name)? {
        let dir = PathBuf::from(&record.config_dir);
        if dir.join(CONFIG_FILE_NAME).is_file() {
            debug!("Using recorded config dir {}", dir.display());
            return Ok(dir);
        }
    }

    let start = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };
    let repo_root = config::discover_repo_root(&start).await;
    let dir = config::find_workspace_dir(&start, &repo_root, &ctx.layout.home)?;

    let derived = WorkspaceIdentity::from_config_dir(&dir, None)?;
    if derived.name != name {
        debug!(
            "Config dir {} derives workspace '{}', using requested name '{}'",
            dir.display(),
            derived.name,
            name
        );
    }
    Ok(dir)
}

/// Resolve the full configuration for a named workspace.
pub async fn resolve_workspace(
    ctx: &CommandContext,
    name: &str,
    path: Option<&Path>,
) -> Result<ResolvedConfig> {
    let config_dir = locate_config_dir(ctx, name, path)
        .await
        .with_context(|| format!("Workspace '{}' needs a resolvable {}", name, CONFIG_FILE_NAME))?;

    let project = config::load_project_config(&config_dir)?;
    let user = config::load_user_config(&ctx.layout)?;
    let options = ResolveOptions {
        workspace_name_override: Some(name.to_string()),
        build_context: None,
    };
    let resolved = config::resolve_config(&project, &user, &config_dir, &ctx.layout, &options)?;
    Ok(resolved)
}

/// Fail with a consistent message when a command requires a known
/// workspace and none is recorded.
pub fn require_record(
    ctx: &CommandContext,
    name: &str,
) -> Result<workspace_core::state::WorkspaceRecord> {
    match ctx.store.get_workspace(name)? {
        Some(record) => Ok(record),
        None => bail!(
            "No state recorded for workspace '{}'. Run `workspace start {}` first.",
            name,
            name
        ),
    }
}
