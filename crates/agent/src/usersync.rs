//! UID/GID synchronization
//!
//! Rewrites the `workspace` user and group so that files created in the
//! container carry the invoking host user's ids. Conflicting ids already
//! present in the image are shifted to 60000 before the rename retries.
//! Refuses to sync to root ids.

use anyhow::Result;
use tracing::{debug, info, warn};
use workspace_core::errors::AgentError;
use workspace_core::process::Cmd;

/// GID/UID that conflicting groups and users are shifted onto
const EVICTION_ID: u32 = 60000;

/// Target ids parsed from `HOST_UID` / `HOST_GID`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIds {
    pub uid: u32,
    pub gid: u32,
}

/// Parse and validate the host ids from the environment. `None` means the
/// sync should be skipped (missing, unparsable, or root ids).
pub fn host_ids_from_env(uid: Option<&str>, gid: Option<&str>) -> Option<HostIds> {
    let uid: u32 = uid?.trim().parse().ok()?;
    let gid: u32 = gid?.trim().parse().ok()?;
    if uid == 0 || gid == 0 {
        warn!("Refusing to sync workspace user to root ids");
        return None;
    }
    Some(HostIds { uid, gid })
}

/// Bring the `workspace` user and group in line with the host ids and
/// rechown the home directory.
pub async fn sync_workspace_user(ids: HostIds) -> Result<()> {
    let current_uid = query_id(&["-u", "workspace"]).await;
    let current_gid = query_id(&["-g", "workspace"]).await;
    if current_uid == Some(ids.uid) && current_gid == Some(ids.gid) {
        debug!("workspace user already has uid {} gid {}", ids.uid, ids.gid);
        return Ok(());
    }
    info!(
        "Syncing workspace user to uid {} gid {} (was {:?}/{:?})",
        ids.uid, ids.gid, current_uid, current_gid
    );

    sync_group(ids.gid).await?;
    sync_user(ids).await?;

    Cmd::new("chown")
        .arg("-R")
        .arg(format!("{}:{}", ids.uid, ids.gid))
        .arg("/home/workspace")
        .run_captured()
        .await
        .map_err(|e| AgentError::UserSync(format!("rechown of /home/workspace failed: {}", e)))?;

    Ok(())
}

async fn query_id(args: &[&str]) -> Option<u32> {
    let output = Cmd::new("id")
        .args(args.iter().copied())
        .ignore_failure()
        .run_captured()
        .await
        .ok()?;
    if !output.success() {
        return None;
    }
    output.stdout.trim().parse().ok()
}

async fn sync_group(gid: u32) -> Result<()> {
    let first = Cmd::new("groupmod")
        .arg("-g")
        .arg(gid.to_string())
        .arg("workspace")
        .ignore_failure()
        .run_captured()
        .await?;
    if first.success() {
        return Ok(());
    }

    // Another group holds the target gid; shift it out of the way.
    if let Some(conflicting) = getent_name("group", gid).await {
        info!(
            "Group '{}' holds gid {}, moving it to {}",
            conflicting, gid, EVICTION_ID
        );
        Cmd::new("groupmod")
            .arg("-g")
            .arg(EVICTION_ID.to_string())
            .arg(&conflicting)
            .run_captured()
            .await
            .map_err(|e| AgentError::UserSync(format!("could not evict group: {}", e)))?;

        Cmd::new("groupmod")
            .arg("-g")
            .arg(gid.to_string())
            .arg("workspace")
            .run_captured()
            .await
            .map_err(|e| AgentError::UserSync(format!("groupmod retry failed: {}", e)))?;
        return Ok(());
    }

    Err(AgentError::UserSync(format!("groupmod failed: {}", first.stderr.trim())).into())
}

async fn sync_user(ids: HostIds) -> Result<()> {
    let gid = ids.gid.to_string();
    let uid = ids.uid.to_string();

    let first = Cmd::new("usermod")
        .args(["-u", uid.as_str(), "-g", gid.as_str(), "workspace"])
        .ignore_failure()
        .run_captured()
        .await?;
    if first.success() {
        return Ok(());
    }

    if let Some(conflicting) = getent_name("passwd", ids.uid).await {
        info!(
            "User '{}' holds uid {}, moving it to {}",
            conflicting, ids.uid, EVICTION_ID
        );
        Cmd::new("usermod")
            .arg("-u")
            .arg(EVICTION_ID.to_string())
            .arg(&conflicting)
            .run_captured()
            .await
            .map_err(|e| AgentError::UserSync(format!("could not evict user: {}", e)))?;

        Cmd::new("usermod")
            .args(["-u", uid.as_str(), "-g", gid.as_str(), "workspace"])
            .run_captured()
            .await
            .map_err(|e| AgentError::UserSync(format!("usermod retry failed: {}", e)))?;
        return Ok(());
    }

    Err(AgentError::UserSync(format!("usermod failed: {}", first.stderr.trim())).into())
}

/// Name of the group or user currently holding `id`, via getent.
async fn getent_name(database: &str, id: u32) -> Option<String> {
    let output = Cmd::new("getent")
        .arg(database)
        .arg(id.to_string())
        .ignore_failure()
        .run_captured()
        .await
        .ok()?;
    if !output.success() {
        return None;
    }
    let name = output.stdout.split(':').next()?.trim();
    if name.is_empty() || name == "workspace" {
        None
    } else {
        Some(name.to_string())
    }
}
