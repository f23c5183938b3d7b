//! First-run workspace initialization
//!
//! Runs as the `workspace` user, driven by the runtime snapshot mounted at
//! `/workspace/config/runtime.json`. The whole sequence is idempotent once
//! `~/.workspace-initialized` exists: the repository clone and bootstrap
//! scripts are gated by the marker, everything else carries its own
//! presence check. A failed clone or bootstrap script aborts before the
//! marker is written, so the next `start` retries.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use workspace_core::errors::AgentError;
use workspace_core::fsutil;
use workspace_core::process::Cmd;
use workspace_core::runtime::{RuntimeFile, RuntimeScript, ScriptSource};

/// Marker file name in the workspace home
const MARKER: &str = ".workspace-initialized";

/// LazyVim starter repository used when the host has no nvim config
const LAZYVIM_STARTER: &str = "https://github.com/LazyVim/starter";

/// Paths the init sequence works against; parameterized for tests.
#[derive(Debug, Clone)]
pub struct InitPaths {
    pub home: PathBuf,
    pub host_home: PathBuf,
    pub runtime_config: PathBuf,
    pub source_dir: PathBuf,
    pub userconfig_dir: PathBuf,
}

impl InitPaths {
    fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/home/workspace".to_string());
        Self {
            home: PathBuf::from(home),
            host_home: PathBuf::from(
                std::env::var("HOST_HOME").unwrap_or_else(|_| "/host/home".to_string()),
            ),
            runtime_config: PathBuf::from(
                std::env::var("WORKSPACE_RUNTIME_CONFIG")
                    .unwrap_or_else(|_| "/workspace/config/runtime.json".to_string()),
            ),
            source_dir: PathBuf::from(
                std::env::var("WORKSPACE_SOURCE_DIR")
                    .unwrap_or_else(|_| "/workspace/source".to_string()),
            ),
            userconfig_dir: PathBuf::from("/workspace/userconfig"),
        }
    }

    fn marker(&self) -> PathBuf {
        self.home.join(MARKER)
    }
}

pub async fn run() -> Result<()> {
    let paths = InitPaths::from_env();
    let runtime = RuntimeFile::read(&paths.runtime_config)?;

    // The forwarded agent socket, when mounted, serves every child below.
    if Path::new("/ssh-agent").exists() {
        std::env::set_var("SSH_AUTH_SOCK", "/ssh-agent");
    }

    let initialized = paths.marker().exists();
    if initialized {
        info!("Workspace already initialized, refreshing tooling only");
    }

    copy_host_gitconfig(&paths);

    if !initialized {
        if let Some(remote) = runtime.workspace.repo.remote.clone() {
            clone_repository(&paths, &runtime, &remote).await?;
        }
    }

    append_rc_exports(&paths.home)?;
    ensure_editor_config(&paths).await;
    install_dev_tools(&paths).await;

    if !initialized {
        run_bootstrap_scripts(&paths, &runtime.bootstrap.scripts).await?;
        fs::write(paths.marker(), "")?;
        info!("Workspace initialization complete");
    }

    Ok(())
}

/// Copy the host `.gitconfig` into the workspace home when present.
fn copy_host_gitconfig(paths: &InitPaths) {
    let src = paths.host_home.join(".gitconfig");
    if !src.is_file() {
        return;
    }
    let dest = paths.home.join(".gitconfig");
    if let Err(e) = fs::copy(&src, &dest) {
        warn!("Could not copy host .gitconfig: {}", e);
    }
}

/// Clone the configured repository into the workspace home.
///
/// The first attempt passes `--branch` (unless the configured clone args
/// already pick one); on failure the clone retries without it, so a
/// repository whose default branch differs still comes down. Both failing
/// aborts the init.
async fn clone_repository(paths: &InitPaths, runtime: &RuntimeFile, remote: &str) -> Result<()> {
    let repo = &runtime.workspace.repo;
    let target = paths.home.join(repo_basename(remote));
    if target.join(".git").is_dir() {
        debug!("{} already cloned", target.display());
        return Ok(());
    }

    let ssh_command = runtime.ssh.selected_key.as_ref().and_then(|key| {
        if paths.home.join(".ssh").join(key).is_file() {
            Some(format!("ssh -i ~/.ssh/{} -F ~/.ssh/config", key))
        } else {
            None
        }
    });

    if let Some(host) = ssh_host_of(remote) {
        ensure_known_host(&paths.home, &host).await;
    }

    let mut base = Cmd::new("git").arg("clone").current_dir(&paths.home);
    if let Some(cmd) = &ssh_command {
        base = base.env("GIT_SSH_COMMAND", cmd);
    }
    for arg in &repo.clone_args {
        base = base.arg(arg);
    }

    let with_branch = !has_branch_flag(&repo.clone_args);
    let first = if with_branch {
        base.clone()
            .arg("--branch")
            .arg(&repo.branch)
            .arg(remote)
            .ignore_failure()
            .run_streaming(false)
            .await?
    } else {
        base.clone()
            .arg(remote)
            .ignore_failure()
            .run_streaming(false)
            .await?
    };

    if !first.success() {
        if with_branch {
            warn!(
                "Clone with --branch {} failed, retrying without",
                repo.branch
            );
            let second = base
                .clone()
                .arg(remote)
                .ignore_failure()
                .run_streaming(false)
                .await?;
            if !second.success() {
                return Err(AgentError::Clone {
                    remote: remote.to_string(),
                    message: format!("clone exited with code {}", second.code),
                }
                .into());
            }
        } else {
            return Err(AgentError::Clone {
                remote: remote.to_string(),
                message: format!("clone exited with code {}", first.code),
            }
            .into());
        }
    }

    // Later git operations in the checkout keep using the selected key.
    if let Some(cmd) = &ssh_command {
        if target.is_dir() {
            let _ = Cmd::new("git")
                .args(["config", "core.sshCommand", cmd])
                .current_dir(&target)
                .ignore_failure()
                .run_captured()
                .await;
        }
    }

    info!("Cloned {} into {}", remote, target.display());
    Ok(())
}

/// Repository directory name produced by `git clone <remote>`.
fn repo_basename(remote: &str) -> String {
    let trimmed = remote.trim_end_matches('/').trim_end_matches(".git");
    trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("source")
        .to_string()
}

/// Hostname of an SSH-style or URL-style remote, when one can be read.
fn ssh_host_of(remote: &str) -> Option<String> {
    if let Some(rest) = remote.strip_prefix("ssh://") {
        let host_part = rest.split('/').next()?;
        let host = host_part.rsplit('@').next()?;
        return Some(host.split(':').next()?.to_string());
    }
    if remote.starts_with("http://") || remote.starts_with("https://") {
        // Cloning over HTTPS needs no known_hosts entry.
        return None;
    }
    // scp-like form: git@github.com:owner/repo.git
    let (user_host, _path) = remote.split_once(':')?;
    let host = user_host.rsplit('@').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Add the remote's host key to `known_hosts` when it is not already
/// known. Failures are non-fatal; StrictHostKeyChecking decides later.
async fn ensure_known_host(home: &Path, host: &str) {
    let known_hosts = home.join(".ssh/known_hosts");
    let already_known = Cmd::new("ssh-keygen")
        .args(["-F", host])
        .arg("-f")
        .arg(known_hosts.display().to_string())
        .ignore_failure()
        .run_captured()
        .await
        .map(|out| out.success())
        .unwrap_or(false);
    if already_known {
        return;
    }

    let scan = Cmd::new("ssh-keyscan")
        .arg(host)
        .ignore_failure()
        .run_captured()
        .await;
    match scan {
        Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
            if let Some(parent) = known_hosts.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let mut existing = fs::read_to_string(&known_hosts).unwrap_or_default();
            if !existing.is_empty() && !existing.ends_with('\n') {
                existing.push('\n');
            }
            existing.push_str(&out.stdout);
            if let Err(e) = fs::write(&known_hosts, existing) {
                warn!("Could not update known_hosts: {}", e);
            }
        }
        _ => warn!("ssh-keyscan of {} produced nothing", host),
    }
}

const RC_EXPORTS: &[&str] = &[
    "export GIT_SSH_COMMAND=\"ssh -F ~/.ssh/config\"",
    "export PATH=\"$HOME/.npm-global/bin:$PATH\"",
];

/// Append shell exports to `.bashrc` and `.zshrc`, idempotent by substring
/// check.
fn append_rc_exports(home: &Path) -> Result<()> {
    for rc in [".bashrc", ".zshrc"] {
        let path = home.join(rc);
        let mut content = fs::read_to_string(&path).unwrap_or_default();
        let mut changed = false;
        for line in RC_EXPORTS {
            if !content.contains(line) {
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(line);
                content.push('\n');
                changed = true;
            }
        }
        if changed {
            fs::write(&path, content)
                .with_context(|| format!("Cannot update {}", path.display()))?;
        }
    }
    Ok(())
}

/// Make sure `~/.config/nvim` holds an editor configuration: the host's
/// when copyable, the LazyVim starter otherwise. Never fatal.
async fn ensure_editor_config(paths: &InitPaths) {
    let nvim_dir = paths.home.join(".config/nvim");
    if nvim_dir.join("init.lua").exists() || nvim_dir.join("init.vim").exists() {
        return;
    }

    let host_nvim = paths.host_home.join(".config/nvim");
    if host_nvim.is_dir() {
        let copied = Cmd::new("sudo")
            .args(["cp", "-r"])
            .arg(host_nvim.display().to_string())
            .arg(nvim_dir.display().to_string())
            .ignore_failure()
            .run_captured()
            .await;
        if matches!(&copied, Ok(out) if out.success()) {
            rechown_to_me(&nvim_dir).await;
            info!("Copied host nvim configuration");
            return;
        }
        warn!("Could not copy host nvim configuration, falling back to LazyVim starter");
    }

    let cloned = Cmd::new("git")
        .args(["clone", LAZYVIM_STARTER])
        .arg(nvim_dir.display().to_string())
        .ignore_failure()
        .run_streaming(false)
        .await;
    match cloned {
        Ok(out) if out.success() => {
            let _ = fs::remove_dir_all(nvim_dir.join(".git"));
            rechown_to_me(&nvim_dir).await;
            info!("Installed LazyVim starter");
        }
        _ => warn!("LazyVim starter clone failed; no editor config installed"),
    }
}

async fn rechown_to_me(dir: &Path) {
    let _ = Cmd::new("sudo")
        .args(["chown", "-R", "workspace:workspace"])
        .arg(dir.display().to_string())
        .ignore_failure()
        .run_captured()
        .await;
}

/// Install the agent CLIs once; each is skipped when already on PATH.
/// Failures warn rather than abort: a workspace without them is degraded,
/// not broken.
async fn install_dev_tools(paths: &InitPaths) {
    if !on_path("codex").await {
        let result = Cmd::new("npm")
            .args(["install", "-g", "@openai/codex"])
            .ignore_failure()
            .run_streaming(false)
            .await;
        if !matches!(&result, Ok(out) if out.success()) {
            warn!("codex install failed");
        }
    }

    if !on_path("opencode").await {
        if let Err(e) = install_opencode(paths).await {
            warn!("opencode install failed: {}", e);
        }
    }
}

async fn on_path(binary: &str) -> bool {
    let probe = Cmd::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", binary))
        .ignore_failure()
        .run_captured()
        .await;
    matches!(&probe, Ok(out) if out.success())
}

/// Fetch the opencode release zip for this architecture and unpack it into
/// `~/.local/bin`.
async fn install_opencode(paths: &InitPaths) -> Result<()> {
    let uname = Cmd::new("uname").arg("-m").run_captured().await?;
    let arch = match uname.stdout.trim() {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => {
            warn!("Unsupported architecture for opencode: {}", other);
            return Ok(());
        }
    };

    let url = format!(
        "https://github.com/sst/opencode/releases/latest/download/opencode-linux-{}.zip",
        arch
    );
    let zip = std::env::temp_dir().join("opencode.zip");
    Cmd::new("curl")
        .args(["-fsSL", "-o"])
        .arg(zip.display().to_string())
        .arg(&url)
        .run_captured()
        .await?;

    let bin_dir = paths.home.join(".local/bin");
    fsutil::ensure_dir(&bin_dir)?;
    Cmd::new("unzip")
        .args(["-o", "-d"])
        .arg(bin_dir.display().to_string())
        .arg(zip.display().to_string())
        .run_captured()
        .await?;
    let _ = fs::remove_file(&zip);

    let binary = bin_dir.join("opencode");
    if binary.is_file() {
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Expand declared bootstrap entries into the concrete executable list.
///
/// A directory entry contributes its executable files in lexical order; a
/// file entry must exist and be executable or the init aborts with a
/// placement hint.
fn expand_bootstrap_entries(
    paths: &InitPaths,
    scripts: &[RuntimeScript],
) -> Result<Vec<PathBuf>> {
    let mut expanded = Vec::new();
    for entry in scripts {
        let base = match entry.source {
            ScriptSource::Project => &paths.source_dir,
            ScriptSource::User => &paths.userconfig_dir,
        };
        let full = base.join(&entry.path);

        if full.is_dir() {
            expanded.extend(fsutil::list_executable_files(&full)?);
            continue;
        }

        if !full.is_file() {
            return Err(AgentError::Bootstrap {
                path: full.display().to_string(),
                reason: format!(
                    "not found (scripts tagged '{}' resolve under {})",
                    source_label(entry.source),
                    base.display()
                ),
            }
            .into());
        }
        let mode = fs::metadata(&full)?.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(AgentError::Bootstrap {
                path: full.display().to_string(),
                reason: "not executable (chmod +x it)".to_string(),
            }
            .into());
        }
        expanded.push(full);
    }
    Ok(expanded)
}

/// Whether the configured clone args already pick a branch.
fn has_branch_flag(clone_args: &[String]) -> bool {
    clone_args
        .iter()
        .any(|a| a == "--branch" || a == "-b" || a.starts_with("--branch="))
}

fn source_label(source: ScriptSource) -> &'static str {
    match source {
        ScriptSource::Project => "project",
        ScriptSource::User => "user",
    }
}

/// Run the bootstrap scripts in declared order, CWD at the workspace home,
/// inheriting the environment. The first non-zero exit aborts.
async fn run_bootstrap_scripts(paths: &InitPaths, scripts: &[RuntimeScript]) -> Result<()> {
    let expanded = expand_bootstrap_entries(paths, scripts)?;
    for script in &expanded {
        info!("Running bootstrap script {}", script.display());
        Cmd::new(script.display().to_string())
            .current_dir(&paths.home)
            .run_streaming(false)
            .await
            .with_context(|| format!("Bootstrap script {} failed", script.display()))?;
    }
    Ok(())
}
