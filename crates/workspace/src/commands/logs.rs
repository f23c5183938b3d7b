//! `workspace logs`: stream container logs.

use anyhow::{bail, Result};
use workspace_core::docker::Docker;
use workspace_core::workspace::WorkspaceIdentity;

pub async fn execute(name: &str, tail: u32, follow: bool) -> Result<()> {
    let identity = WorkspaceIdentity::new(name);
    let docker = Docker::new();

    if !docker.container_exists(&identity.container_name).await? {
        bail!("No container named {} exists", identity.container_name);
    }

    docker.logs(&identity.container_name, tail, follow).await?;
    Ok(())
}
