//! SSH key installation inside the container
//!
//! Populates the workspace user's `~/.ssh` from the read-only host mount,
//! authorizes the controller's per-workspace public key, and wires the
//! selected repository key into the SSH client configuration. File modes
//! follow sshd's expectations: private keys and `authorized_keys` at 600,
//! public material at 644.

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, warn};
use workspace_core::process::Cmd;

/// Inputs for one key installation pass
#[derive(Debug, Clone, Default)]
pub struct KeyInstall {
    /// `$SSH_PUBLIC_KEY`: the controller's per-workspace public key
    pub public_key: Option<String>,
    /// `$WORKSPACE_SELECTED_SSH_KEY`: basename of the repo key, if any
    pub selected_key: Option<String>,
}

/// Install keys into `workspace_ssh_dir`, copying from `host_ssh_dir` when
/// it exists. Pure filesystem work; ownership is fixed separately.
pub fn install_keys(
    workspace_ssh_dir: &Path,
    host_ssh_dir: &Path,
    install: &KeyInstall,
) -> Result<()> {
    fs::create_dir_all(workspace_ssh_dir)?;
    fs::set_permissions(workspace_ssh_dir, fs::Permissions::from_mode(0o700))?;

    copy_host_keys(workspace_ssh_dir, host_ssh_dir);

    let authorized = workspace_ssh_dir.join("authorized_keys");
    ensure_authorized_key(&authorized, install.public_key.as_deref())?;

    if let Some(name) = &install.selected_key {
        if workspace_ssh_dir.join(name).is_file() {
            append_client_config(&workspace_ssh_dir.join("config"), name)?;
        } else {
            debug!("Selected key '{}' not present in copied set", name);
        }
    }

    fix_modes(workspace_ssh_dir)?;
    Ok(())
}

/// Copy plain files from the host `.ssh` directory. Failures are logged
/// and skipped; a partially copied set is still usable.
fn copy_host_keys(dest: &Path, host_ssh_dir: &Path) {
    let Ok(entries) = fs::read_dir(host_ssh_dir) else {
        debug!("No host .ssh directory at {}", host_ssh_dir.display());
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let target = dest.join(entry.file_name());
        if let Err(e) = fs::copy(&path, &target) {
            warn!("Could not copy {}: {}", path.display(), e);
        }
    }
}

/// Append `public_key` to `authorized_keys` unless already present, then
/// sort and deduplicate the file.
fn ensure_authorized_key(authorized: &Path, public_key: Option<&str>) -> Result<()> {
    let existing = fs::read_to_string(authorized).unwrap_or_default();
    let mut lines: Vec<String> = existing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();

    if let Some(key) = public_key {
        let key = key.trim();
        if !key.is_empty() && !lines.iter().any(|l| l == key) {
            lines.push(key.to_string());
        }
    }

    lines.sort();
    lines.dedup();

    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(authorized, content)?;
    Ok(())
}

/// Append the client configuration block routing all hosts through the
/// selected identity. Idempotent by substring check.
fn append_client_config(config_path: &Path, key_name: &str) -> Result<()> {
    let identity_line = format!("    IdentityFile ~/.ssh/{}", key_name);
    let existing = fs::read_to_string(config_path).unwrap_or_default();
    if existing.contains(&identity_line) {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str("Host *\n");
    content.push_str(&identity_line);
    content.push('\n');
    content.push_str("    IdentitiesOnly yes\n");
    content.push_str("    AddKeysToAgent yes\n");
    fs::write(config_path, content)?;
    Ok(())
}

/// 600 for private keys and `authorized_keys`, 644 for public material.
fn fix_modes(ssh_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(ssh_dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let mode = if name.ends_with(".pub") || name == "known_hosts" || name == "config" {
            0o644
        } else {
            0o600
        };
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Hand the whole `.ssh` tree to the workspace user. Non-fatal: sshd will
/// complain loudly if this goes wrong, and the log line names the cause.
pub async fn chown_to_workspace(dir: &Path) {
    let result = Cmd::new("chown")
        .arg("-R")
        .arg("workspace:workspace")
        .arg(dir.display().to_string())
        .ignore_failure()
        .run_captured()
        .await;
    match result {
        Ok(out) if out.success() => {}
        Ok(out) => warn!("chown of {} failed: {}", dir.display(), out.stderr.trim()),
        Err(e) => warn!("chown of {} failed: {}", dir.display(), e),
    }
}
