//! Container entrypoint and daemon supervision
//!
//! Runs as root. Ordering: user sync, SSH key install, cache rechown,
//! dockerd launch and readiness, sshd, then a supervisor child is spawned
//! and the process replaces itself with `tail -f` on the dockerd log so the
//! container's PID 1 stays alive and streams logs to the host. dockerd and
//! sshd outlive this process; only the supervisor child keeps watching
//! them.

use crate::{sshkeys, usersync};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use workspace_core::process::Cmd;

/// dockerd output lands here; also what the container tails as PID 1
const DOCKERD_LOG: &str = "/var/log/dockerd.log";

/// dockerd readiness deadline
const DOCKERD_TIMEOUT: Duration = Duration::from_secs(30);

/// Supervisor wake interval
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(10);

/// Log lines echoed when dockerd never comes up
const FAILURE_TAIL_LINES: usize = 50;

pub async fn run() -> Result<()> {
    // 1. Sync the workspace user to the invoking host user. Non-fatal: a
    // mismatched uid still yields a usable container.
    let host_uid = std::env::var("HOST_UID").ok();
    let host_gid = std::env::var("HOST_GID").ok();
    let ids = usersync::host_ids_from_env(host_uid.as_deref(), host_gid.as_deref());
    if let Some(ids) = ids {
        if let Err(e) = usersync::sync_workspace_user(ids).await {
            warn!("User sync failed, continuing: {}", e);
        }
    }

    // 2. Install SSH keys. Non-fatal as well.
    let host_home = PathBuf::from(
        std::env::var("HOST_HOME").unwrap_or_else(|_| "/host/home".to_string()),
    );
    let ssh_dir = PathBuf::from("/home/workspace/.ssh");
    let install = sshkeys::KeyInstall {
        public_key: std::env::var("SSH_PUBLIC_KEY").ok().filter(|k| !k.is_empty()),
        selected_key: std::env::var("WORKSPACE_SELECTED_SSH_KEY")
            .ok()
            .filter(|k| !k.is_empty()),
    };
    if let Err(e) = sshkeys::install_keys(&ssh_dir, &host_home.join(".ssh"), &install) {
        warn!("SSH key installation failed, continuing: {}", e);
    }
    sshkeys::chown_to_workspace(&ssh_dir).await;

    // 3. The cache volume mounts root-owned; hand it to the synced user.
    let owner = ids
        .map(|ids| format!("{}:{}", ids.uid, ids.gid))
        .unwrap_or_else(|| "workspace:workspace".to_string());
    let _ = Cmd::new("chown")
        .arg("-R")
        .arg(&owner)
        .arg("/home/workspace/.cache")
        .ignore_failure()
        .run_captured()
        .await;

    // 4. dockerd, with its output captured to the log the container tails.
    spawn_dockerd().context("Failed to spawn dockerd")?;
    if !wait_for_local_dockerd(DOCKERD_TIMEOUT).await {
        echo_log_tail(Path::new(DOCKERD_LOG), FAILURE_TAIL_LINES);
        bail!(
            "dockerd did not become ready within {}s",
            DOCKERD_TIMEOUT.as_secs()
        );
    }
    info!("dockerd is ready");

    // 5. sshd backgrounds itself.
    Cmd::new("/usr/sbin/sshd")
        .run_captured()
        .await
        .context("Failed to start sshd")?;

    // 6. Supervision survives the exec below only as a separate process.
    spawn_supervisor().context("Failed to spawn supervisor")?;

    // 7. Replace ourselves with the log follower; never returns on success.
    exec_tail()
}

fn spawn_dockerd() -> std::io::Result<()> {
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(DOCKERD_LOG)?;
    let log_err = log.try_clone()?;

    std::process::Command::new("dockerd")
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .spawn()?;
    Ok(())
}

fn spawn_supervisor() -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("supervise")
        .stdin(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

fn exec_tail() -> Result<()> {
    use std::os::unix::process::CommandExt;
    let err = std::process::Command::new("tail")
        .args(["-f", DOCKERD_LOG])
        .exec();
    // exec only returns on failure.
    Err(err).context("exec of tail failed")
}

/// Poll `docker version` until it succeeds or the deadline passes.
async fn wait_for_local_dockerd(timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let probe = Cmd::new("docker")
            .arg("version")
            .ignore_failure()
            .run_captured()
            .await;
        if matches!(&probe, Ok(out) if out.success()) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn echo_log_tail(log: &Path, lines: usize) {
    let Ok(content) = std::fs::read_to_string(log) else {
        eprintln!("(no dockerd log at {})", log.display());
        return;
    };
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    for line in &all[start..] {
        eprintln!("{}", line);
    }
}

/// Supervision loop: every ten seconds re-probe dockerd and sshd by
/// process name and restart whichever is missing. Runs until the container
/// dies.
pub async fn supervise() -> Result<()> {
    info!(
        "Supervisor running (interval {}s)",
        SUPERVISE_INTERVAL.as_secs()
    );
    loop {
        tokio::time::sleep(SUPERVISE_INTERVAL).await;

        if !process_alive("dockerd").await {
            warn!("dockerd is gone, restarting");
            if let Err(e) = spawn_dockerd() {
                warn!("dockerd restart failed: {}", e);
            }
        }

        if !process_alive("sshd").await {
            warn!("sshd is gone, restarting");
            let result = Cmd::new("/usr/sbin/sshd")
                .ignore_failure()
                .run_captured()
                .await;
            if let Err(e) = result {
                warn!("sshd restart failed: {}", e);
            }
        }
    }
}

async fn process_alive(name: &str) -> bool {
    let probe = Cmd::new("pgrep")
        .args(["-x", name])
        .ignore_failure()
        .run_captured()
        .await;
    matches!(&probe, Ok(out) if out.success())
}
