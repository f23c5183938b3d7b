//! `workspace list`: all known workspaces with their container status.

use crate::commands::shared::CommandContext;
use anyhow::Result;
use std::path::Path;
use workspace_core::docker::Docker;
use workspace_core::workspace::WorkspaceIdentity;

pub async fn execute(path_filter: Option<&Path>) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let docker = Docker::new();
    let state = ctx.store.load()?;

    if state.workspaces.is_empty() {
        println!("No workspaces recorded. Create one with `workspace init`.");
        return Ok(());
    }

    for (name, record) in &state.workspaces {
        if let Some(filter) = path_filter {
            if !Path::new(&record.config_dir).starts_with(filter) {
                continue;
            }
        }

        let identity = WorkspaceIdentity::new(name);
        let status = match docker.inspect_container(&identity.container_name).await {
            Ok(Some(info)) => info.state.status,
            Ok(None) => "absent".to_string(),
            Err(_) => "unknown".to_string(),
        };

        println!(
            "{:<20} {:<10} ssh:{:<6} {}",
            name, status, record.ssh_port, record.config_dir
        );
    }
    Ok(())
}
