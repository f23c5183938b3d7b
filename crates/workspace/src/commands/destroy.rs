//! `workspace destroy`: remove containers, named volumes, and state.
//!
//! Missing containers and volumes are non-fatal: destroy is the recovery
//! path for half-created workspaces, so it must succeed on partial state.

use crate::commands::shared::CommandContext;
use crate::ui;
use anyhow::{bail, Result};
use tracing::info;
use workspace_core::docker::Docker;
use workspace_core::workspace::WorkspaceIdentity;

pub async fn execute(names: &[String], keep_volumes: bool, force: bool) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let docker = Docker::new();

    if !force {
        let effect = if keep_volumes {
            "containers and state (volumes kept)"
        } else {
            "containers, volumes, and state"
        };
        let prompt = format!("Destroy {} of: {}?", effect, names.join(", "));
        if !ui::confirm(&prompt)? {
            bail!("Aborted");
        }
    }

    for name in names {
        destroy_one(&ctx, &docker, name, keep_volumes).await?;
    }
    Ok(())
}

async fn destroy_one(
    ctx: &CommandContext,
    docker: &Docker,
    name: &str,
    keep_volumes: bool,
) -> Result<()> {
    let identity = WorkspaceIdentity::new(name);
    info!("Destroying workspace '{}'", name);

    docker
        .remove_container(&identity.container_name, true)
        .await?;

    if !keep_volumes {
        for volume in identity.volume_names() {
            docker.remove_volume(&volume).await?;
        }
    }

    ctx.store.remove_workspace_state(name)?;
    println!("Destroyed {}", name);
    Ok(())
}
