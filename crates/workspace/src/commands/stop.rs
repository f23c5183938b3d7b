//! `workspace stop`: stop a running workspace container. Never fails on
//! "already stopped".

use anyhow::Result;
use workspace_core::docker::Docker;
use workspace_core::workspace::WorkspaceIdentity;

pub async fn execute(name: &str) -> Result<()> {
    let identity = WorkspaceIdentity::new(name);
    let docker = Docker::new();

    match docker.inspect_container(&identity.container_name).await? {
        Some(info) if info.state.running => {
            docker.stop_container(&identity.container_name).await?;
            println!("Stopped {}", identity.container_name);
        }
        Some(info) => {
            println!(
                "{} is not running (status: {})",
                identity.container_name, info.state.status
            );
        }
        None => {
            println!("No container named {} exists", identity.container_name);
        }
    }
    Ok(())
}
